//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Write attempted on a read-only instance.
    #[error("write refused: instance is read-only")]
    ReadOnly,

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A transactional step affected an unexpected number of rows.
    ///
    /// Treated as corruption: the whole transaction is rolled back.
    #[error("row count mismatch in `{sql}`: expected {expected}, affected {actual}")]
    RowCountMismatch {
        sql: String,
        expected: usize,
        actual: usize,
    },

    /// Invalid data found in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A blocking task failed to join.
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
