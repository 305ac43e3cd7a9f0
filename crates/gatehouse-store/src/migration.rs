//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system: each migration transforms the schema
//! from version N to N+1 inside one transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent; safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: initial auth schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Identity rows, owned by external identity subsystems
        CREATE TABLE users (
            user_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE teams (
            team_id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        -- Issued bearer tokens; immutable once written
        CREATE TABLE tokens (
            value BLOB PRIMARY KEY,           -- 32 bytes, blake3-keyed MAC
            salt BLOB NOT NULL,
            valid_from INTEGER NOT NULL,      -- Unix ms
            expires_at INTEGER NOT NULL,      -- Unix ms
            user_id INTEGER NOT NULL
        );

        -- Password-derived material for basic-auth validation
        CREATE TABLE credentials (
            user_id INTEGER PRIMARY KEY,
            material BLOB NOT NULL,
            expires_at INTEGER NOT NULL
        );

        -- Permission namespaces; each primary has a '<name>:grant' row
        CREATE TABLE categories (
            name TEXT PRIMARY KEY,
            created_by INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Two-level operation hierarchy under a category
        CREATE TABLE sections (
            section_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            UNIQUE(category, name)
        );

        CREATE TABLE actions (
            action_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            section_id INTEGER NOT NULL,
            UNIQUE(section_id, name)
        );

        CREATE TABLE permissions (
            permission_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            created_by INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(category, name)
        );

        -- Primary permission <-> its shadow in the grant meta-category
        CREATE TABLE permission_links (
            primary_id INTEGER PRIMARY KEY,
            meta_id INTEGER NOT NULL UNIQUE
        );

        -- Which actions a permission authorizes
        CREATE TABLE permission_actions (
            permission_id INTEGER NOT NULL,
            action_id INTEGER NOT NULL,
            PRIMARY KEY (permission_id, action_id)
        );

        -- Authorization edges; object_id set for scoped categories
        CREATE TABLE grants (
            grant_id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient_kind TEXT NOT NULL,     -- 'user' | 'team'
            recipient_id INTEGER NOT NULL,
            permission_id INTEGER NOT NULL,
            category TEXT NOT NULL,
            object_id INTEGER
        );

        -- Indexes for hot lookups
        CREATE INDEX idx_tokens_user ON tokens(user_id);
        CREATE INDEX idx_sections_category ON sections(category);
        CREATE INDEX idx_actions_section ON actions(section_id);
        CREATE INDEX idx_permissions_category ON permissions(category);
        CREATE INDEX idx_grants_recipient ON grants(recipient_kind, recipient_id);
        CREATE INDEX idx_grants_permission ON grants(permission_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
