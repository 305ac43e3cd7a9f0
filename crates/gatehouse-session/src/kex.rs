//! Key-exchange session management for the encrypted bootstrap channel.
//!
//! Credential-carrying operations (token issuance, activation, password
//! changes) are preceded by an X25519 key agreement. The server generates a
//! fresh keypair per session, derives the shared channel key immediately,
//! and drops the secret half; only the symmetric key and the IV survive in
//! the session table. Sessions are single-use and expire.

use gatehouse_core::{
    ChannelKey, InstanceMode, Iv, KexKeypair, KexPublicKey, LockMap, RequestId,
};

use crate::error::{Result, SessionError};

/// Default session lifetime: a client has this long to come back with its
/// encrypted payload.
pub const DEFAULT_SESSION_TTL_MS: i64 = 60_000;

/// The server's half of a completed key agreement, returned to the client.
#[derive(Debug, Clone)]
pub struct KexOffer {
    /// Identifier the client must present with its encrypted payload.
    pub request_id: RequestId,
    /// The server's ephemeral public key.
    pub server_public: KexPublicKey,
    /// The IV the client must encrypt its payload with. Never zero.
    pub server_iv: Iv,
}

/// One live key-exchange session awaiting its encrypted payload.
#[derive(Clone)]
pub struct KexSession {
    /// Symmetric key derived from the X25519 agreement.
    pub channel_key: ChannelKey,
    /// The IV for the session's payload. Invariant: never all-zero.
    pub iv: Iv,
    /// Address the session was initiated from.
    pub client_addr: String,
    /// When the session was created (Unix ms).
    pub created_at: i64,
    /// When the session lapses (Unix ms).
    pub expires_at: i64,
}

impl std::fmt::Debug for KexSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KexSession")
            .field("client_addr", &self.client_addr)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Manages the table of in-flight key-exchange sessions.
///
/// Cheap to clone; clones share the session table.
#[derive(Clone)]
pub struct KexManager {
    sessions: LockMap<RequestId, KexSession>,
    mode: InstanceMode,
    ttl_ms: i64,
}

impl KexManager {
    /// Create a manager for the given instance mode.
    pub fn new(mode: InstanceMode) -> Self {
        Self::with_ttl(mode, DEFAULT_SESSION_TTL_MS)
    }

    /// Create a manager with a custom session lifetime.
    pub fn with_ttl(mode: InstanceMode, ttl_ms: i64) -> Self {
        Self {
            sessions: LockMap::new(),
            mode,
            ttl_ms,
        }
    }

    /// Begin a key-exchange session with a client.
    ///
    /// Refused on read-only instances: the operations a session unlocks are
    /// all writes. A zero client IV is tolerated (some clients send one on
    /// their first request) but never stored; the session always carries a
    /// fresh non-zero server IV.
    pub fn initiate(
        &self,
        client_public: &KexPublicKey,
        client_iv: &Iv,
        client_addr: &str,
        now: i64,
    ) -> Result<KexOffer> {
        if !self.mode.is_writable() {
            return Err(SessionError::ReadOnly);
        }

        if client_iv.is_zero() {
            tracing::debug!(%client_addr, "zero client IV at kex init, ignoring");
        }

        let request_id = RequestId::random();
        let keypair = KexKeypair::generate();
        let shared = keypair.diffie_hellman(client_public);
        let channel_key = shared.derive_channel_key(&request_id.0.to_le_bytes());
        let server_iv = Iv::generate_nonzero();

        let session = KexSession {
            channel_key,
            iv: server_iv,
            client_addr: client_addr.to_string(),
            created_at: now,
            expires_at: now + self.ttl_ms,
        };
        self.sessions.insert(request_id, session);

        tracing::debug!(%request_id, %client_addr, "kex session initiated");

        Ok(KexOffer {
            request_id,
            server_public: keypair.public_key(),
            server_iv,
        })
    }

    /// Remove and return the session for a request id.
    ///
    /// Single use: a second consume for the same id fails. An expired
    /// session is removed but not returned.
    pub fn consume(&self, request_id: RequestId, now: i64) -> Result<KexSession> {
        self.sessions
            .remove(&request_id)
            .filter(|session| session.expires_at >= now)
            .ok_or(SessionError::UnknownSession(request_id))
    }

    /// Drop every expired session.
    pub fn prune(&self, now: i64) {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.expires_at >= now);
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            tracing::debug!(dropped, "pruned expired kex sessions");
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> KexKeypair {
        KexKeypair::generate()
    }

    #[test]
    fn test_initiate_and_consume_derive_same_key() {
        let manager = KexManager::new(InstanceMode::Full);
        let client = client();

        let offer = manager
            .initiate(&client.public_key(), &Iv::generate_nonzero(), "10.0.0.5", 1000)
            .unwrap();

        // The client derives the channel key from its side of the agreement.
        let client_key = client
            .diffie_hellman(&offer.server_public)
            .derive_channel_key(&offer.request_id.0.to_le_bytes());

        let session = manager.consume(offer.request_id, 1500).unwrap();
        assert_eq!(session.channel_key.as_bytes(), client_key.as_bytes());

        // Encrypted traffic round-trips between the two derivations.
        let ciphertext = client_key.encrypt(b"payload", &session.iv).unwrap();
        assert_eq!(
            session.channel_key.decrypt(&ciphertext, &session.iv).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_session_is_single_use() {
        let manager = KexManager::new(InstanceMode::Full);
        let offer = manager
            .initiate(&client().public_key(), &Iv::generate_nonzero(), "addr", 0)
            .unwrap();

        manager.consume(offer.request_id, 10).unwrap();
        let err = manager.consume(offer.request_id, 10).unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }

    #[test]
    fn test_zero_client_iv_never_stored() {
        let manager = KexManager::new(InstanceMode::Full);
        let offer = manager
            .initiate(&client().public_key(), &Iv::ZERO, "addr", 0)
            .unwrap();

        assert!(!offer.server_iv.is_zero());
        let session = manager.consume(offer.request_id, 10).unwrap();
        assert!(!session.iv.is_zero());
    }

    #[test]
    fn test_expired_session_not_consumable() {
        let manager = KexManager::with_ttl(InstanceMode::Full, 100);
        let offer = manager
            .initiate(&client().public_key(), &Iv::generate_nonzero(), "addr", 1000)
            .unwrap();

        let err = manager.consume(offer.request_id, 1200).unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
        // Consumed on the failed attempt too; the table is empty.
        assert!(manager.is_empty());
    }

    #[test]
    fn test_prune_drops_only_expired() {
        let manager = KexManager::with_ttl(InstanceMode::Full, 100);
        let old = manager
            .initiate(&client().public_key(), &Iv::generate_nonzero(), "a", 0)
            .unwrap();
        let fresh = manager
            .initiate(&client().public_key(), &Iv::generate_nonzero(), "b", 90)
            .unwrap();

        manager.prune(150);

        assert!(matches!(
            manager.consume(old.request_id, 150),
            Err(SessionError::UnknownSession(_))
        ));
        assert!(manager.consume(fresh.request_id, 150).is_ok());
    }

    #[test]
    fn test_read_only_instance_refuses_initiate() {
        let manager = KexManager::new(InstanceMode::ReadOnly);
        let err = manager
            .initiate(&client().public_key(), &Iv::generate_nonzero(), "addr", 0)
            .unwrap_err();
        assert!(matches!(err, SessionError::ReadOnly));
        assert!(manager.is_empty());
    }
}
