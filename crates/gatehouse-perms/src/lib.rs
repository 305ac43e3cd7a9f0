//! Category, permission, and grant engine.
//!
//! Categories namespace permissions; each category is paired with a
//! `<name>:grant` meta-category whose permissions control granting inside
//! it. Grants bind user recipients to permissions, optionally limited to a
//! single object for the scoped categories. The relational store holds the
//! truth; the in-memory maps serve the hot authorize path.

pub mod engine;
pub mod error;
pub mod maps;

pub use engine::PermissionEngine;
pub use error::{PermsError, Result};
pub use maps::GrantMaps;
