//! Test fixtures: a running in-memory Gatehouse plus seeded identities.

use gatehouse::{Config, Gatehouse, MapKind, MapOp, MapUpdate, Reply, Request};
use gatehouse_core::{Iv, KexKeypair, UserId, Verdict};
use gatehouse_session::KexOffer;
use serde::Serialize;

/// Token MAC secret all harnesses share, so tokens are reproducible.
pub const TEST_SECRET_HEX: &str =
    "5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a";

/// A running in-memory instance with a root account.
pub struct TestHarness {
    pub gatehouse: Gatehouse,
}

/// Install a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

impl TestHarness {
    /// Start a writable in-memory instance with the shared test secret.
    pub async fn start() -> Self {
        Self::start_with(Config {
            token_secret: Some(TEST_SECRET_HEX.to_string()),
            ..Config::default()
        })
        .await
    }

    /// Start with a custom config.
    pub async fn start_with(config: Config) -> Self {
        init_tracing();
        let gatehouse = Gatehouse::start(config).await.expect("gatehouse start");
        Self { gatehouse }
    }

    /// The seeded root account id.
    pub fn root(&self) -> UserId {
        self.gatehouse.root()
    }

    /// Send a request as root.
    pub async fn send(&self, request: Request) -> Reply {
        self.gatehouse
            .send(Some(self.root()), "127.0.0.1:9", request)
            .await
            .expect("dispatcher alive")
    }

    /// Send a request with no authenticated caller.
    pub async fn send_anonymous(&self, request: Request) -> Reply {
        self.gatehouse
            .send(None, "127.0.0.1:9", request)
            .await
            .expect("dispatcher alive")
    }

    /// Push a user into the identity maps (arrives inactive).
    pub async fn seed_user(&self, id: i64, name: &str) {
        let reply = self
            .send(Request::UpdateMap(MapUpdate {
                kind: MapKind::User,
                op: MapOp::Add,
                id,
                name: Some(name.to_string()),
            }))
            .await;
        assert_eq!(reply.verdict, Verdict::Ok, "seeding user {name}");
    }

    /// Push a team into the identity maps.
    pub async fn seed_team(&self, id: i64, name: &str) {
        let reply = self
            .send(Request::UpdateMap(MapUpdate {
                kind: MapKind::Team,
                op: MapOp::Add,
                id,
                name: Some(name.to_string()),
            }))
            .await;
        assert_eq!(reply.verdict, Verdict::Ok, "seeding team {name}");
    }

    /// Stop the instance and wait for the dispatcher to drain.
    pub async fn stop(self) {
        self.gatehouse.stop().await;
    }
}

/// The client side of the bootstrap channel, for driving kex flows in
/// tests.
pub struct KexClient {
    keypair: KexKeypair,
}

impl Default for KexClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KexClient {
    /// Generate a fresh client keypair.
    pub fn new() -> Self {
        Self {
            keypair: KexKeypair::generate(),
        }
    }

    /// The request that opens the exchange.
    pub fn init_request(&self) -> Request {
        Request::KexInit {
            client_public: self.keypair.public_key(),
            client_iv: Iv::generate_nonzero(),
        }
    }

    /// An init request presenting the degenerate zero IV.
    pub fn init_request_zero_iv(&self) -> Request {
        Request::KexInit {
            client_public: self.keypair.public_key(),
            client_iv: Iv::ZERO,
        }
    }

    /// Derive the channel key from the server's offer and seal a payload.
    pub fn seal<P: Serialize>(&self, offer: &KexOffer, payload: &P) -> Vec<u8> {
        let key = self
            .keypair
            .diffie_hellman(&offer.server_public)
            .derive_channel_key(&offer.request_id.0.to_le_bytes());

        let mut plaintext = Vec::new();
        ciborium::ser::into_writer(payload, &mut plaintext).expect("cbor encode");
        key.encrypt(&plaintext, &offer.server_iv).expect("channel encrypt")
    }
}
