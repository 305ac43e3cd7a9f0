//! Error types for session and authentication handling.

use gatehouse_core::RequestId;
use thiserror::Error;

/// Errors from key-exchange and credential operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Storage failure underneath an auth operation.
    #[error(transparent)]
    Store(#[from] gatehouse_store::StoreError),

    /// Cryptographic failure (key agreement, channel decrypt).
    #[error(transparent)]
    Crypto(#[from] gatehouse_core::CoreError),

    /// Write-path operation attempted on a read-only instance.
    #[error("operation refused: instance is read-only")]
    ReadOnly,

    /// No live key-exchange session for the request id.
    ///
    /// Covers never-initiated, already-consumed, and expired sessions alike;
    /// callers must not be able to distinguish them.
    #[error("no key-exchange session for request {0}")]
    UnknownSession(RequestId),

    /// The decrypted payload did not parse.
    #[error("malformed payload: {0}")]
    Payload(String),

    /// The request authenticated incorrectly (unknown user, stale or wrong
    /// credential, inactive account).
    #[error("rejected: {0}")]
    Rejected(&'static str),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
