//! # Gatehouse
//!
//! Authorization and identity core for a server-orchestration control
//! plane. One instance owns:
//!
//! - an encrypted bootstrap channel (X25519 key exchange, single-use
//!   sessions) for credential-carrying operations;
//! - token-based basic authentication (blake3-keyed MACs, constant-time
//!   comparison);
//! - a hierarchical permission model: categories paired with `:grant`
//!   meta-categories, sections and actions, permissions with shadows, and
//!   user grants that may be limited to one object;
//! - a dispatch loop that totally orders permission-graph mutations while
//!   serving reads and authentication concurrently.
//!
//! Start an instance with [`Gatehouse::start`] and talk to it through
//! [`Gatehouse::send`] with [`Request`] values.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod request;

pub use config::Config;
pub use dispatch::Gatehouse;
pub use error::{GatehouseError, Result};
pub use request::{
    routing, Envelope, MapKind, MapOp, MapUpdate, Reply, ReplyBody, Request, Routing,
};

pub use gatehouse_core as core;
