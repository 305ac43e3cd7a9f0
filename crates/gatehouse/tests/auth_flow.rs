//! End-to-end bootstrap and authentication flows through the dispatcher.

use gatehouse::{Config, Reply, ReplyBody, Request};
use gatehouse_core::{InstanceMode, TokenValue, Verdict};
use gatehouse_session::{ActivateRequest, KexOffer, TokenRequest};
use gatehouse_testkit::{KexClient, TestHarness, TEST_SECRET_HEX};

fn offer_of(reply: Reply) -> KexOffer {
    assert_eq!(reply.verdict, Verdict::Ok);
    match reply.body {
        ReplyBody::KexOffer(offer) => offer,
        other => panic!("expected kex offer, got {other:?}"),
    }
}

async fn sealed_request(
    harness: &TestHarness,
    client: &KexClient,
    payload: impl serde::Serialize,
) -> (gatehouse_core::RequestId, Vec<u8>) {
    let offer = offer_of(harness.send_anonymous(client.init_request()).await);
    let ciphertext = client.seal(&offer, &payload);
    (offer.request_id, ciphertext)
}

#[tokio::test]
async fn activate_issue_and_authenticate() {
    let harness = TestHarness::start().await;
    harness.seed_user(7, "operator").await;
    let client = KexClient::new();

    // Activation sets the initial credential and flips the account active.
    let (request_id, ciphertext) = sealed_request(
        &harness,
        &client,
        ActivateRequest {
            username: "operator".into(),
            credential: b"hunter2".to_vec(),
        },
    )
    .await;
    let reply = harness
        .send_anonymous(Request::ActivateUser {
            request_id,
            ciphertext,
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Ok);

    // A fresh session mints a token.
    let (request_id, ciphertext) = sealed_request(
        &harness,
        &client,
        TokenRequest {
            username: "operator".into(),
            credential: b"hunter2".to_vec(),
        },
    )
    .await;
    let reply = harness
        .send_anonymous(Request::RequestToken {
            request_id,
            ciphertext,
        })
        .await;
    let token = match reply.body {
        ReplyBody::Token(token) => token,
        other => panic!("expected token, got {other:?}"),
    };

    // The token authenticates; a bogus one does not.
    let reply = harness
        .send_anonymous(Request::BasicAuth {
            username: "operator".into(),
            token: token.value,
            restricted_channel: false,
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Ok);

    let reply = harness
        .send_anonymous(Request::BasicAuth {
            username: "operator".into(),
            token: TokenValue::from_bytes([0x77; 32]),
            restricted_channel: false,
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Unauthorized);

    harness.stop().await;
}

#[tokio::test]
async fn zero_client_iv_gets_nonzero_offer() {
    let harness = TestHarness::start().await;
    let client = KexClient::new();

    let offer = offer_of(harness.send_anonymous(client.init_request_zero_iv()).await);
    assert!(!offer.server_iv.is_zero());

    harness.stop().await;
}

#[tokio::test]
async fn bootstrap_failures_are_masked() {
    let harness = TestHarness::start().await;
    harness.seed_user(7, "operator").await;
    let client = KexClient::new();

    // Garbage ciphertext under a real session: the caller learns only 401.
    let offer = offer_of(harness.send_anonymous(client.init_request()).await);
    let reply = harness
        .send_anonymous(Request::RequestToken {
            request_id: offer.request_id,
            ciphertext: vec![0xde, 0xad, 0xbe, 0xef],
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Unauthorized);

    // The session was consumed by the failed attempt; a replay with a
    // well-formed payload is refused the same way.
    let ciphertext = client.seal(
        &offer,
        &TokenRequest {
            username: "operator".into(),
            credential: b"hunter2".to_vec(),
        },
    );
    let reply = harness
        .send_anonymous(Request::RequestToken {
            request_id: offer.request_id,
            ciphertext,
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Unauthorized);

    harness.stop().await;
}

#[tokio::test]
async fn read_only_instance_serves_reads_refuses_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("auth.db");

    // A writer seeds the database, then shuts down.
    let writer = TestHarness::start_with(Config {
        db_path: Some(db_path.clone()),
        token_secret: Some(TEST_SECRET_HEX.to_string()),
        ..Config::default()
    })
    .await;
    writer.stop().await;

    let reader = TestHarness::start_with(Config {
        db_path: Some(db_path),
        mode: InstanceMode::ReadOnly,
        token_secret: Some(TEST_SECRET_HEX.to_string()),
        ..Config::default()
    })
    .await;

    // Reads pass through.
    let reply = reader.send(Request::CategoryList).await;
    assert_eq!(reply.verdict, Verdict::Ok);
    match reply.body {
        ReplyBody::Categories(categories) => assert!(!categories.is_empty()),
        other => panic!("expected categories, got {other:?}"),
    }

    // Graph mutations and the bootstrap channel are refused with Conflict.
    let reply = reader
        .send(Request::CategoryAdd {
            name: gatehouse_core::Category::new("deploys"),
        })
        .await;
    assert_eq!(reply.verdict, Verdict::Conflict);

    let reply = reader
        .send_anonymous(KexClient::new().init_request())
        .await;
    assert_eq!(reply.verdict, Verdict::Conflict);

    reader.stop().await;
}
