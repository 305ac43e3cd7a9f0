//! # Gatehouse Core
//!
//! Core primitives for the Gatehouse authorization and identity core:
//!
//! - **Crypto**: X25519 key agreement for bootstrap channels,
//!   ChaCha20-Poly1305 channel encryption, blake3-keyed token MACs.
//! - **Types**: typed identifiers, category/scope model, verdicts, entity
//!   records.
//! - **Caches**: mutex-guarded lookup maps and paired id/name directories.
//!
//! This crate is pure data and pure functions; all stateful coordination
//! lives in the session, perms, and dispatch crates.

pub mod cache;
pub mod crypto;
pub mod error;
pub mod types;

pub use cache::{LockMap, NameDirectory};
pub use crypto::{
    generate_salt, token_mac, ChannelKey, Iv, KexKeypair, KexPublicKey, SharedKey, TokenSecret,
    TokenValue,
};
pub use error::{CoreError, Result};
pub use types::{
    ActionId, ActionRecord, Category, CategoryRecord, CredentialRecord, GrantId, GrantRecord,
    InstanceMode,
    ObjectId, PermissionId, PermissionRecord, Recipient, RequestId, RootPolicy, Scope, SectionId,
    SectionRecord, TeamId, TeamRecord, TokenRecord, UserId, UserRecord, Verdict,
    BUILTIN_CATEGORIES, GRANT_SUFFIX, ROOT_USER, SYSTEM_CATEGORY,
};
