//! Facade configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use gatehouse_core::{InstanceMode, RootPolicy};
use gatehouse_session::{DEFAULT_SESSION_TTL_MS, DEFAULT_TOKEN_TTL_MS};

use crate::error::{GatehouseError, Result};

/// Configuration for a Gatehouse instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. `None` runs in-memory (tests, ephemeral use).
    pub db_path: Option<PathBuf>,
    /// Full (writable) or read-only instance.
    pub mode: InstanceMode,
    /// Restrictions on the root account.
    pub root_policy: RootPolicy,
    /// Hex-encoded 32-byte token MAC secret. Generated fresh when absent;
    /// set it so tokens survive restarts and replicas agree.
    pub token_secret: Option<String>,
    /// Request queue depth.
    pub queue_depth: usize,
    /// Key-exchange session lifetime (ms).
    pub kex_session_ttl_ms: i64,
    /// Interval between kex session prune sweeps (ms).
    pub kex_prune_interval_ms: u64,
    /// Issued token lifetime (ms).
    pub token_ttl_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            mode: InstanceMode::Full,
            root_policy: RootPolicy::default(),
            token_secret: None,
            queue_depth: 256,
            kex_session_ttl_ms: DEFAULT_SESSION_TTL_MS,
            kex_prune_interval_ms: 30_000,
            token_ttl_ms: DEFAULT_TOKEN_TTL_MS,
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GatehouseError::Config(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| GatehouseError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mode, InstanceMode::Full);
        assert!(config.db_path.is_none());
        assert!(config.token_secret.is_none());
        assert!(config.queue_depth > 0);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"mode":"ReadOnly"}"#).unwrap();
        assert_eq!(config.mode, InstanceMode::ReadOnly);
        assert_eq!(config.queue_depth, Config::default().queue_depth);
    }
}
