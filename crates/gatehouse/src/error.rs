//! Facade-level errors.

use thiserror::Error;

/// Errors surfaced by the facade itself, outside the request/verdict flow.
#[derive(Debug, Error)]
pub enum GatehouseError {
    /// Storage failure during startup.
    #[error(transparent)]
    Store(#[from] gatehouse_store::StoreError),

    /// Session subsystem failure during startup.
    #[error(transparent)]
    Session(#[from] gatehouse_session::SessionError),

    /// Permission engine failure during startup.
    #[error(transparent)]
    Perms(#[from] gatehouse_perms::PermsError),

    /// Configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The dispatch loop is gone; no reply will ever arrive.
    #[error("dispatcher unavailable")]
    Unavailable,
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;
