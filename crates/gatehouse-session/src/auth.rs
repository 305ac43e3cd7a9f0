//! Token and credential authentication.
//!
//! Basic auth presents a `username:token` pair. The token is a blake3-keyed
//! MAC over the user, a stored random salt, and the validity window; the
//! sole pass condition is constant-time equality between the presented value
//! and the recomputed MAC. Credential-carrying operations (issuance,
//! activation, password changes) arrive encrypted under a key-exchange
//! session and are single-use per session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use gatehouse_core::{
    generate_salt, token_mac, CredentialRecord, InstanceMode, LockMap, RequestId, RootPolicy,
    TokenRecord, TokenSecret, TokenValue, UserId, UserRecord, Verdict, ROOT_USER,
};
use gatehouse_store::AuthStore;

use crate::error::{Result, SessionError};
use crate::kex::KexManager;

/// Default token lifetime: 30 days.
pub const DEFAULT_TOKEN_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Default credential lifetime: 180 days.
pub const DEFAULT_CREDENTIAL_TTL_MS: i64 = 180 * 24 * 60 * 60 * 1000;

/// Encrypted payload for token issuance.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub credential: Vec<u8>,
}

/// Encrypted payload for account activation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub username: String,
    pub credential: Vec<u8>,
}

/// Encrypted payload for a self-service password change.
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordChange {
    pub username: String,
    pub old_credential: Vec<u8>,
    pub new_credential: Vec<u8>,
}

/// Encrypted payload for an administrative password reset.
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordReset {
    pub username: String,
    pub new_credential: Vec<u8>,
}

/// Derive the stored material from submitted credential bytes.
///
/// The raw secret never touches the database.
fn credential_material(submitted: &[u8]) -> Vec<u8> {
    blake3::hash(submitted).as_bytes().to_vec()
}

/// Constant-time comparison of submitted credential bytes against stored
/// material.
fn material_matches(stored: &[u8], submitted: &[u8]) -> bool {
    let Ok(stored) = <[u8; 32]>::try_from(stored) else {
        return false;
    };
    blake3::Hash::from_bytes(stored) == blake3::hash(submitted)
}

/// Validates tokens and executes the encrypted credential operations.
///
/// Cheap to clone; clones share the caches and the session table.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn AuthStore>,
    kex: KexManager,
    tokens: LockMap<TokenValue, TokenRecord>,
    credentials: LockMap<UserId, CredentialRecord>,
    mode: InstanceMode,
    root_policy: RootPolicy,
    secret: TokenSecret,
    token_ttl_ms: i64,
    credential_ttl_ms: i64,
}

impl Authenticator {
    /// Create an authenticator over a store and a kex session table.
    pub fn new(
        store: Arc<dyn AuthStore>,
        kex: KexManager,
        secret: TokenSecret,
        root_policy: RootPolicy,
    ) -> Self {
        let mode = store.mode();
        Self {
            store,
            kex,
            tokens: LockMap::new(),
            credentials: LockMap::new(),
            mode,
            root_policy,
            secret,
            token_ttl_ms: DEFAULT_TOKEN_TTL_MS,
            credential_ttl_ms: DEFAULT_CREDENTIAL_TTL_MS,
        }
    }

    /// Override the token lifetime.
    pub fn with_token_ttl(mut self, ttl_ms: i64) -> Self {
        self.token_ttl_ms = ttl_ms;
        self
    }

    /// Load every stored token into the cache.
    ///
    /// Full instances warm up front; read-only instances backfill lazily on
    /// cache miss instead.
    pub async fn warm_caches(&self) -> Result<()> {
        if self.mode.is_writable() {
            for token in self.store.tokens().await? {
                self.tokens.insert(token.value, token);
            }
            tracing::info!(tokens = self.tokens.len(), "token cache warmed");
        }
        Ok(())
    }

    /// The kex session manager this authenticator consumes sessions from.
    pub fn kex(&self) -> &KexManager {
        &self.kex
    }

    // ─────────────────────────────────────────────────────────────────────
    // Basic auth
    // ─────────────────────────────────────────────────────────────────────

    /// Validate a `username:token` pair.
    ///
    /// Every rejection is `Unauthorized`; only storage failures surface as
    /// `ServerError`. An expired token is a rejection, not a server fault.
    pub async fn validate_basic_auth(
        &self,
        username: &str,
        token: &TokenValue,
        restricted_channel: bool,
        remote_addr: &str,
        now: i64,
    ) -> Verdict {
        if username == ROOT_USER {
            if self.root_policy.disabled {
                tracing::warn!(%remote_addr, "root authentication attempt while root is disabled");
                return Verdict::Unauthorized;
            }
            if self.root_policy.restricted_channel_only && !restricted_channel {
                tracing::warn!(
                    %remote_addr,
                    "root authentication attempt over unrestricted channel"
                );
                return Verdict::Unauthorized;
            }
        }

        let user = match self.store.user_by_name(username).await {
            Ok(Some(user)) => user,
            Ok(None) => return Verdict::Unauthorized,
            Err(e) => {
                tracing::error!(error = %e, "user lookup failed during basic auth");
                return Verdict::ServerError;
            }
        };
        if !user.active {
            return Verdict::Unauthorized;
        }

        let record = match self.lookup_token(token).await {
            Ok(Some(record)) => record,
            Ok(None) => return Verdict::Unauthorized,
            Err(e) => {
                tracing::error!(error = %e, "token lookup failed during basic auth");
                return Verdict::ServerError;
            }
        };

        if record.user != user.id {
            return Verdict::Unauthorized;
        }
        if !record.is_current(now) {
            return Verdict::Unauthorized;
        }

        // The recomputed MAC must equal the presented value; nothing else
        // passes. TokenValue equality is constant-time.
        let expected = token_mac(
            &self.secret,
            record.user,
            &record.salt,
            record.valid_from,
            record.expires_at,
        );
        if expected == *token {
            Verdict::Ok
        } else {
            Verdict::Unauthorized
        }
    }

    /// Cache-first token lookup.
    ///
    /// Full instances trust the warmed cache: a miss is a miss. Read-only
    /// instances lazily backfill from the store, since tokens are issued
    /// elsewhere.
    async fn lookup_token(&self, token: &TokenValue) -> Result<Option<TokenRecord>> {
        if let Some(record) = self.tokens.get(token) {
            return Ok(Some(record));
        }
        if self.mode.is_writable() {
            return Ok(None);
        }
        match self.store.token_by_value(token).await? {
            Some(record) => {
                self.tokens.insert(record.value, record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Encrypted credential operations
    // ─────────────────────────────────────────────────────────────────────

    /// Issue a fresh token for a user who proves their credential.
    ///
    /// Renewal mints a new token; an existing token is never mutated.
    pub async fn issue_token(
        &self,
        request_id: RequestId,
        ciphertext: &[u8],
        now: i64,
    ) -> Result<TokenRecord> {
        self.ensure_writable()?;
        let payload: TokenRequest = self.open_payload(request_id, ciphertext, now)?;

        let user = self.active_user(&payload.username).await?;
        self.check_credential(user.id, &payload.credential, now)
            .await?;

        let salt = generate_salt();
        let valid_from = now;
        let expires_at = now + self.token_ttl_ms;
        let value = token_mac(&self.secret, user.id, &salt, valid_from, expires_at);
        let record = TokenRecord {
            value,
            salt,
            valid_from,
            expires_at,
            user: user.id,
        };

        self.store.insert_token(&record).await?;
        self.tokens.insert(record.value, record.clone());

        tracing::info!(user = %user.id, "token issued");
        Ok(record)
    }

    /// Activate a pending account, setting its initial credential.
    pub async fn activate_user(
        &self,
        request_id: RequestId,
        ciphertext: &[u8],
        now: i64,
    ) -> Result<UserId> {
        self.ensure_writable()?;
        let payload: ActivateRequest = self.open_payload(request_id, ciphertext, now)?;

        let user = self
            .store
            .user_by_name(&payload.username)
            .await?
            .ok_or(SessionError::Rejected("unknown user"))?;
        if user.active {
            return Err(SessionError::Rejected("already active"));
        }

        self.store_credential(user.id, &payload.credential, now)
            .await?;
        self.store.set_user_active(user.id, true).await?;

        tracing::info!(user = %user.id, "user activated");
        Ok(user.id)
    }

    /// Change a user's password, proving knowledge of the old one.
    pub async fn change_password(
        &self,
        request_id: RequestId,
        ciphertext: &[u8],
        now: i64,
    ) -> Result<UserId> {
        self.ensure_writable()?;
        let payload: PasswordChange = self.open_payload(request_id, ciphertext, now)?;

        let user = self.active_user(&payload.username).await?;
        self.check_credential(user.id, &payload.old_credential, now)
            .await?;
        self.store_credential(user.id, &payload.new_credential, now)
            .await?;

        tracing::info!(user = %user.id, "password changed");
        Ok(user.id)
    }

    /// Administrative password reset; the caller is authorized upstream.
    pub async fn reset_password(
        &self,
        request_id: RequestId,
        ciphertext: &[u8],
        now: i64,
    ) -> Result<UserId> {
        self.ensure_writable()?;
        let payload: PasswordReset = self.open_payload(request_id, ciphertext, now)?;

        let user = self
            .store
            .user_by_name(&payload.username)
            .await?
            .ok_or(SessionError::Rejected("unknown user"))?;
        self.store_credential(user.id, &payload.new_credential, now)
            .await?;

        tracing::info!(user = %user.id, "password reset");
        Ok(user.id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(SessionError::ReadOnly)
        }
    }

    /// Consume the kex session and decrypt/decode the payload.
    fn open_payload<P: for<'de> Deserialize<'de>>(
        &self,
        request_id: RequestId,
        ciphertext: &[u8],
        now: i64,
    ) -> Result<P> {
        let session = self.kex.consume(request_id, now)?;
        let plaintext = session.channel_key.decrypt(ciphertext, &session.iv)?;
        ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|e| SessionError::Payload(e.to_string()))
    }

    async fn active_user(&self, username: &str) -> Result<UserRecord> {
        let user = self
            .store
            .user_by_name(username)
            .await?
            .ok_or(SessionError::Rejected("unknown user"))?;
        if !user.active {
            return Err(SessionError::Rejected("inactive user"));
        }
        Ok(user)
    }

    async fn check_credential(&self, user: UserId, submitted: &[u8], now: i64) -> Result<()> {
        let record = match self.credentials.get(&user) {
            Some(record) => record,
            None => {
                let record = self
                    .store
                    .credential_for_user(user)
                    .await?
                    .ok_or(SessionError::Rejected("no credential on file"))?;
                self.credentials.insert(user, record.clone());
                record
            }
        };

        if record.expires_at < now {
            return Err(SessionError::Rejected("credential expired"));
        }
        if !material_matches(&record.material, submitted) {
            return Err(SessionError::Rejected("credential mismatch"));
        }
        Ok(())
    }

    async fn store_credential(&self, user: UserId, submitted: &[u8], now: i64) -> Result<()> {
        let record = CredentialRecord {
            user,
            material: credential_material(submitted),
            expires_at: now + self.credential_ttl_ms,
        };
        self.store.upsert_credential(&record).await?;
        self.credentials.insert(user, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{Iv, KexKeypair};
    use gatehouse_store::SqliteStore;

    const NOW: i64 = 1_700_000_000_000;

    struct Setup {
        store: Arc<SqliteStore>,
        auth: Authenticator,
    }

    async fn setup(root_policy: RootPolicy) -> Setup {
        let store = Arc::new(SqliteStore::open_memory(InstanceMode::Full).unwrap());
        let kex = KexManager::new(InstanceMode::Full);
        let auth = Authenticator::new(
            store.clone(),
            kex,
            TokenSecret::from_bytes([0x5a; 32]),
            root_policy,
        );

        store
            .upsert_user(&UserRecord {
                id: UserId(1),
                name: "root".into(),
                active: true,
            })
            .await
            .unwrap();
        store
            .upsert_user(&UserRecord {
                id: UserId(2),
                name: "operator".into(),
                active: true,
            })
            .await
            .unwrap();
        store
            .upsert_credential(&CredentialRecord {
                user: UserId(2),
                material: credential_material(b"hunter2"),
                expires_at: NOW + 1_000_000,
            })
            .await
            .unwrap();

        Setup { store, auth }
    }

    /// Client side of the bootstrap channel: run the kex, encrypt a payload.
    fn encrypt_payload<P: Serialize>(auth: &Authenticator, payload: &P) -> (RequestId, Vec<u8>) {
        let client = KexKeypair::generate();
        let offer = auth
            .kex()
            .initiate(&client.public_key(), &Iv::generate_nonzero(), "test", NOW)
            .unwrap();
        let key = client
            .diffie_hellman(&offer.server_public)
            .derive_channel_key(&offer.request_id.0.to_le_bytes());

        let mut plaintext = Vec::new();
        ciborium::ser::into_writer(payload, &mut plaintext).unwrap();
        let ciphertext = key.encrypt(&plaintext, &offer.server_iv).unwrap();
        (offer.request_id, ciphertext)
    }

    async fn issue(auth: &Authenticator, username: &str, credential: &[u8]) -> Result<TokenRecord> {
        let (request_id, ciphertext) = encrypt_payload(
            auth,
            &TokenRequest {
                username: username.into(),
                credential: credential.to_vec(),
            },
        );
        auth.issue_token(request_id, &ciphertext, NOW).await
    }

    #[tokio::test]
    async fn test_issue_and_validate_token() {
        let s = setup(RootPolicy::default()).await;
        let token = issue(&s.auth, "operator", b"hunter2").await.unwrap();

        let verdict = s
            .auth
            .validate_basic_auth("operator", &token.value, false, "10.0.0.5", NOW + 1000)
            .await;
        assert_eq!(verdict, Verdict::Ok);
    }

    #[tokio::test]
    async fn test_wrong_credential_rejected() {
        let s = setup(RootPolicy::default()).await;
        let err = issue(&s.auth, "operator", b"wrong").await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized_not_server_error() {
        let s = setup(RootPolicy::default()).await;
        let bogus = TokenValue::from_bytes([0x11; 32]);
        let verdict = s
            .auth
            .validate_basic_auth("operator", &bogus, false, "10.0.0.5", NOW)
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthorized_not_server_error() {
        let s = setup(RootPolicy::default()).await;
        let token = issue(&s.auth, "operator", b"hunter2").await.unwrap();

        let after_expiry = token.expires_at + 1;
        let verdict = s
            .auth
            .validate_basic_auth("operator", &token.value, false, "10.0.0.5", after_expiry)
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);

        // Before the window opens is just as invalid.
        let verdict = s
            .auth
            .validate_basic_auth("operator", &token.value, false, "10.0.0.5", token.valid_from - 1)
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_token_bound_to_its_user() {
        let s = setup(RootPolicy::default()).await;
        let token = issue(&s.auth, "operator", b"hunter2").await.unwrap();

        let verdict = s
            .auth
            .validate_basic_auth("root", &token.value, false, "10.0.0.5", NOW)
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_disabled_root_never_authenticates() {
        let policy = RootPolicy {
            disabled: true,
            restricted_channel_only: false,
        };
        let s = setup(policy).await;

        // A perfectly valid root token is refused on policy alone.
        s.store
            .upsert_credential(&CredentialRecord {
                user: UserId(1),
                material: credential_material(b"rootpw"),
                expires_at: NOW + 1_000_000,
            })
            .await
            .unwrap();
        let token = issue(&s.auth, "root", b"rootpw").await.unwrap();

        let verdict = s
            .auth
            .validate_basic_auth("root", &token.value, true, "10.0.0.5", NOW)
            .await;
        assert_eq!(verdict, Verdict::Unauthorized);
    }

    #[tokio::test]
    async fn test_root_restricted_to_channel() {
        let policy = RootPolicy {
            disabled: false,
            restricted_channel_only: true,
        };
        let s = setup(policy).await;
        s.store
            .upsert_credential(&CredentialRecord {
                user: UserId(1),
                material: credential_material(b"rootpw"),
                expires_at: NOW + 1_000_000,
            })
            .await
            .unwrap();
        let token = issue(&s.auth, "root", b"rootpw").await.unwrap();

        let over_open = s
            .auth
            .validate_basic_auth("root", &token.value, false, "10.0.0.5", NOW)
            .await;
        assert_eq!(over_open, Verdict::Unauthorized);

        let over_restricted = s
            .auth
            .validate_basic_auth("root", &token.value, true, "10.0.0.5", NOW)
            .await;
        assert_eq!(over_restricted, Verdict::Ok);
    }

    #[tokio::test]
    async fn test_read_only_instance_backfills_token_lazily() {
        let s = setup(RootPolicy::default()).await;
        let token = issue(&s.auth, "operator", b"hunter2").await.unwrap();

        // A read-only peer over the same database, with a cold cache.
        let ro_store = Arc::new(s.store.with_mode(InstanceMode::ReadOnly));
        let ro_auth = Authenticator::new(
            ro_store,
            KexManager::new(InstanceMode::ReadOnly),
            TokenSecret::from_bytes([0x5a; 32]),
            RootPolicy::default(),
        );

        let verdict = ro_auth
            .validate_basic_auth("operator", &token.value, false, "10.0.0.5", NOW)
            .await;
        assert_eq!(verdict, Verdict::Ok);
        // The row was backfilled; a repeat hits the cache.
        assert_eq!(ro_auth.tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_read_only_instance_refuses_issuance() {
        let s = setup(RootPolicy::default()).await;
        let ro_store = Arc::new(s.store.with_mode(InstanceMode::ReadOnly));
        let ro_auth = Authenticator::new(
            ro_store,
            KexManager::new(InstanceMode::Full),
            TokenSecret::from_bytes([0x5a; 32]),
            RootPolicy::default(),
        );

        let (request_id, ciphertext) = encrypt_payload(
            &ro_auth,
            &TokenRequest {
                username: "operator".into(),
                credential: b"hunter2".to_vec(),
            },
        );
        let err = ro_auth
            .issue_token(request_id, &ciphertext, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ReadOnly));
    }

    #[tokio::test]
    async fn test_activate_then_change_password() {
        let s = setup(RootPolicy::default()).await;
        s.store
            .upsert_user(&UserRecord {
                id: UserId(3),
                name: "newhire".into(),
                active: false,
            })
            .await
            .unwrap();

        // Inactive users cannot get tokens.
        let err = issue(&s.auth, "newhire", b"first-pw").await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));

        let (rid, ct) = encrypt_payload(
            &s.auth,
            &ActivateRequest {
                username: "newhire".into(),
                credential: b"first-pw".to_vec(),
            },
        );
        s.auth.activate_user(rid, &ct, NOW).await.unwrap();

        assert!(issue(&s.auth, "newhire", b"first-pw").await.is_ok());

        let (rid, ct) = encrypt_payload(
            &s.auth,
            &PasswordChange {
                username: "newhire".into(),
                old_credential: b"first-pw".to_vec(),
                new_credential: b"second-pw".to_vec(),
            },
        );
        s.auth.change_password(rid, &ct, NOW).await.unwrap();

        assert!(issue(&s.auth, "newhire", b"first-pw").await.is_err());
        assert!(issue(&s.auth, "newhire", b"second-pw").await.is_ok());
    }

    #[tokio::test]
    async fn test_session_not_reusable_across_operations() {
        let s = setup(RootPolicy::default()).await;
        let (rid, ct) = encrypt_payload(
            &s.auth,
            &TokenRequest {
                username: "operator".into(),
                credential: b"hunter2".to_vec(),
            },
        );
        s.auth.issue_token(rid, &ct, NOW).await.unwrap();

        // Replaying the same session fails: it was consumed.
        let err = s.auth.issue_token(rid, &ct, NOW).await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }
}
