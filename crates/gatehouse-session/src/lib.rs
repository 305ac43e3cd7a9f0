//! Key-exchange sessions and token/credential authentication.
//!
//! The bootstrap channel runs X25519 key agreement per request
//! ([`kex::KexManager`]); the authenticator ([`auth::Authenticator`])
//! validates `username:token` basic auth and executes the encrypted
//! credential operations a session unlocks.

pub mod auth;
pub mod error;
pub mod kex;

pub use auth::{
    ActivateRequest, Authenticator, PasswordChange, PasswordReset, TokenRequest,
    DEFAULT_TOKEN_TTL_MS,
};
pub use error::{Result, SessionError};
pub use kex::{KexManager, KexOffer, KexSession, DEFAULT_SESSION_TTL_MS};
