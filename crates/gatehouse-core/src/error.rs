//! Error types for the core module.

use thiserror::Error;

/// Errors that can occur in core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Key or token material has the wrong length.
    #[error("invalid key material")]
    InvalidKeyMaterial,

    /// Encryption failure.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption failure (wrong key, tampered ciphertext).
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Hex decoding failure.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
