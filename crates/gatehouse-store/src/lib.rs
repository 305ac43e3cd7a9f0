//! Persistence layer: the AuthStore trait, its SQLite implementation, the
//! schema migrations, and the transactional step plans behind cascading
//! mutations.

pub mod error;
pub mod migration;
pub mod plan;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use plan::{param, ExpectedRows, TxPlan};
pub use sqlite::SqliteStore;
pub use traits::AuthStore;
