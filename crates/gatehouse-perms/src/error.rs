//! Error types for the permission engine.

use gatehouse_core::Verdict;
use gatehouse_store::StoreError;
use thiserror::Error;

/// Errors from category, permission, and grant operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Storage failure underneath an engine operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed input (empty name, reserved suffix, missing or stray
    /// object id).
    #[error("bad request: {0}")]
    BadRequest(&'static str),

    /// Recognized but unsupported operation shape.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl PermsError {
    /// The verdict this error maps to at the request boundary.
    pub fn verdict(&self) -> Verdict {
        match self {
            PermsError::Store(StoreError::ReadOnly) => Verdict::Conflict,
            PermsError::Store(StoreError::NotFound(_)) => Verdict::NotFound,
            PermsError::Store(StoreError::AlreadyExists(_)) => Verdict::Conflict,
            PermsError::Store(_) => Verdict::ServerError,
            PermsError::BadRequest(_) => Verdict::BadRequest,
            PermsError::NotImplemented(_) => Verdict::NotImplemented,
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, PermsError>;
