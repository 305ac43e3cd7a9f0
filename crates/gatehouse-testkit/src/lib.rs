//! Shared test fixtures and proptest generators for the Gatehouse
//! workspace. Not published.

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, KexClient, TestHarness, TEST_SECRET_HEX};
