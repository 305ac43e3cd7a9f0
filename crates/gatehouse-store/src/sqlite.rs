//! SQLite implementation of the AuthStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. The connection is shared behind a mutex;
//! write statements run inside explicit transactions, and the cascading
//! mutations are expressed as [`TxPlan`]s so row-count mismatches roll the
//! whole operation back.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use gatehouse_core::{
    ActionId, ActionRecord, Category, CategoryRecord, CredentialRecord, GrantId, GrantRecord,
    InstanceMode, ObjectId, PermissionId, PermissionRecord, Recipient, SectionId, SectionRecord,
    TeamId, TeamRecord, TokenRecord, TokenValue, UserId, UserRecord, SYSTEM_CATEGORY,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::plan::{param, ExpectedRows, TxPlan};
use crate::traits::AuthStore;

/// SQLite-based auth store.
///
/// Thread-safe via an internal mutex; all operations use `spawn_blocking`
/// to keep SQLite I/O off the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    mode: InstanceMode,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>, mode: InstanceMode) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            mode,
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory(mode: InstanceMode) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            mode,
        })
    }

    /// A handle onto the same database under a different instance mode.
    ///
    /// Lets a read-only authenticator share the database of a writable
    /// instance in tests and co-located deployments.
    pub fn with_mode(&self, mode: InstanceMode) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            mode,
        }
    }

    /// Refuse writes on a read-only instance before touching the database.
    fn ensure_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StoreError::ReadOnly)
        }
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Row mapping helpers
// ─────────────────────────────────────────────────────────────────────────

fn blob_to_array<const N: usize>(blob: Vec<u8>, what: &str) -> Result<[u8; N]> {
    blob.try_into()
        .map_err(|_| StoreError::InvalidData(format!("{what}: wrong blob length")))
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId(row.get("user_id")?),
        name: row.get("name")?,
        active: row.get::<_, i64>("active")? != 0,
    })
}

fn row_to_team(row: &rusqlite::Row<'_>) -> rusqlite::Result<TeamRecord> {
    Ok(TeamRecord {
        id: TeamId(row.get("team_id")?),
        name: row.get("name")?,
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> Result<TokenRecord> {
    let value: Vec<u8> = row.get("value")?;
    Ok(TokenRecord {
        value: TokenValue::from_bytes(blob_to_array(value, "token value")?),
        salt: row.get("salt")?,
        valid_from: row.get("valid_from")?,
        expires_at: row.get("expires_at")?,
        user: UserId(row.get("user_id")?),
    })
}

fn row_to_category(row: &rusqlite::Row<'_>) -> rusqlite::Result<CategoryRecord> {
    Ok(CategoryRecord {
        name: Category::new(row.get::<_, String>("name")?),
        created_by: UserId(row.get("created_by")?),
        created_at: row.get("created_at")?,
    })
}

fn row_to_section(row: &rusqlite::Row<'_>) -> rusqlite::Result<SectionRecord> {
    Ok(SectionRecord {
        id: SectionId(row.get("section_id")?),
        name: row.get("name")?,
        category: Category::new(row.get::<_, String>("category")?),
    })
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRecord> {
    Ok(ActionRecord {
        id: ActionId(row.get("action_id")?),
        name: row.get("name")?,
        section: SectionId(row.get("section_id")?),
    })
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionRecord> {
    Ok(PermissionRecord {
        id: PermissionId(row.get("permission_id")?),
        name: row.get("name")?,
        category: Category::new(row.get::<_, String>("category")?),
        created_by: UserId(row.get("created_by")?),
        created_at: row.get("created_at")?,
    })
}

fn recipient_parts(recipient: Recipient) -> (&'static str, i64) {
    match recipient {
        Recipient::User(id) => ("user", id.0),
        Recipient::Team(id) => ("team", id.0),
    }
}

fn recipient_from(kind: &str, id: i64) -> Result<Recipient> {
    match kind {
        "user" => Ok(Recipient::User(UserId(id))),
        "team" => Ok(Recipient::Team(TeamId(id))),
        other => Err(StoreError::InvalidData(format!(
            "unknown recipient kind: {other}"
        ))),
    }
}

fn row_to_grant(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, GrantRecord)> {
    let kind: String = row.get("recipient_kind")?;
    let recipient_id: i64 = row.get("recipient_id")?;
    let grant = GrantRecord {
        id: GrantId(row.get("grant_id")?),
        // Patched by the caller once the kind string is decoded.
        recipient: Recipient::User(UserId(recipient_id)),
        permission: PermissionId(row.get("permission_id")?),
        category: Category::new(row.get::<_, String>("category")?),
        object: row.get::<_, Option<i64>>("object_id")?.map(ObjectId),
    };
    Ok((kind, recipient_id, grant))
}

fn decode_grant(row_result: (String, i64, GrantRecord)) -> Result<GrantRecord> {
    let (kind, recipient_id, mut grant) = row_result;
    grant.recipient = recipient_from(&kind, recipient_id)?;
    Ok(grant)
}

const GRANT_COLUMNS: &str =
    "grant_id, recipient_kind, recipient_id, permission_id, category, object_id";

/// Look up a permission id by category and name inside a transaction.
fn permission_id_in_tx(
    tx: &rusqlite::Transaction<'_>,
    category: &str,
    name: &str,
) -> Result<Option<PermissionId>> {
    let id: Option<i64> = tx
        .query_row(
            "SELECT permission_id FROM permissions WHERE category = ?1 AND name = ?2",
            params![category, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(PermissionId))
}

/// The cascading teardown steps for one section.
fn section_teardown_steps(
    tx: &rusqlite::Transaction<'_>,
    plan: TxPlan,
    section: SectionId,
) -> Result<TxPlan> {
    let mut plan = plan;

    let mut stmt = tx.prepare("SELECT action_id FROM actions WHERE section_id = ?1")?;
    let action_ids: Vec<i64> = stmt
        .query_map(params![section.0], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for action_id in action_ids {
        plan = plan
            .step(
                "DELETE FROM permission_actions WHERE action_id = ?1",
                vec![param(action_id)],
                ExpectedRows::Any,
            )
            .step(
                "DELETE FROM actions WHERE action_id = ?1",
                vec![param(action_id)],
                ExpectedRows::Exactly(1),
            );
    }

    plan = plan.step(
        "DELETE FROM sections WHERE section_id = ?1",
        vec![param(section.0)],
        ExpectedRows::Exactly(1),
    );

    Ok(plan)
}

/// The teardown steps for one primary permission and its shadow.
fn permission_teardown_steps(plan: TxPlan, primary: PermissionId, meta: PermissionId) -> TxPlan {
    plan.step(
        "DELETE FROM grants WHERE permission_id IN (?1, ?2)",
        vec![param(primary.0), param(meta.0)],
        ExpectedRows::Any,
    )
    .step(
        "DELETE FROM permission_actions WHERE permission_id IN (?1, ?2)",
        vec![param(primary.0), param(meta.0)],
        ExpectedRows::Any,
    )
    .step(
        "DELETE FROM permission_links WHERE primary_id = ?1",
        vec![param(primary.0)],
        ExpectedRows::Exactly(1),
    )
    .step(
        "DELETE FROM permissions WHERE permission_id = ?1",
        vec![param(meta.0)],
        ExpectedRows::Exactly(1),
    )
    .step(
        "DELETE FROM permissions WHERE permission_id = ?1",
        vec![param(primary.0)],
        ExpectedRows::Exactly(1),
    )
}

#[async_trait]
impl AuthStore for SqliteStore {
    fn mode(&self) -> InstanceMode {
        self.mode
    }

    // ─────────────────────────────────────────────────────────────────────
    // Identity reads
    // ─────────────────────────────────────────────────────────────────────

    async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT user_id, name, active FROM users WHERE user_id = ?1",
                params![id.0],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        let name = name.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT user_id, name, active FROM users WHERE name = ?1",
                params![name],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn users(&self) -> Result<Vec<UserRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT user_id, name, active FROM users")?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
        .await
    }

    async fn teams(&self) -> Result<Vec<TeamRecord>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT team_id, name FROM teams")?;
            let teams = stmt
                .query_map([], row_to_team)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(teams)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Token / credential reads
    // ─────────────────────────────────────────────────────────────────────

    async fn token_by_value(&self, value: &TokenValue) -> Result<Option<TokenRecord>> {
        let value = *value;
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT value, salt, valid_from, expires_at, user_id
                     FROM tokens WHERE value = ?1",
                    params![value.0.as_slice()],
                    |row| {
                        Ok((
                            row.get::<_, Vec<u8>>("value")?,
                            row.get::<_, Vec<u8>>("salt")?,
                            row.get::<_, i64>("valid_from")?,
                            row.get::<_, i64>("expires_at")?,
                            row.get::<_, i64>("user_id")?,
                        ))
                    },
                )
                .optional()?;

            let Some((value, salt, valid_from, expires_at, user_id)) = row else {
                return Ok(None);
            };

            Ok(Some(TokenRecord {
                value: TokenValue::from_bytes(blob_to_array(value, "token value")?),
                salt,
                valid_from,
                expires_at,
                user: UserId(user_id),
            }))
        })
        .await
    }

    async fn tokens(&self) -> Result<Vec<TokenRecord>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT value, salt, valid_from, expires_at, user_id FROM tokens")?;
            let mut rows = stmt.query([])?;
            let mut tokens = Vec::new();
            while let Some(row) = rows.next()? {
                tokens.push(row_to_token(row)?);
            }
            Ok(tokens)
        })
        .await
    }

    async fn credential_for_user(&self, user: UserId) -> Result<Option<CredentialRecord>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT user_id, material, expires_at FROM credentials WHERE user_id = ?1",
                params![user.0],
                |row| {
                    Ok(CredentialRecord {
                        user: UserId(row.get("user_id")?),
                        material: row.get("material")?,
                        expires_at: row.get("expires_at")?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permission graph reads
    // ─────────────────────────────────────────────────────────────────────

    async fn category(&self, name: &Category) -> Result<Option<CategoryRecord>> {
        let name = name.name().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT name, created_by, created_at FROM categories WHERE name = ?1",
                params![name],
                row_to_category,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn categories(&self) -> Result<Vec<CategoryRecord>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT name, created_by, created_at FROM categories ORDER BY name")?;
            let categories = stmt
                .query_map([], row_to_category)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(categories)
        })
        .await
    }

    async fn sections(&self, category: &Category) -> Result<Vec<SectionRecord>> {
        let category = category.name().to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT section_id, name, category FROM sections
                 WHERE category = ?1 ORDER BY name",
            )?;
            let sections = stmt
                .query_map(params![category], row_to_section)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sections)
        })
        .await
    }

    async fn actions(&self, section: SectionId) -> Result<Vec<ActionRecord>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT action_id, name, section_id FROM actions
                 WHERE section_id = ?1 ORDER BY name",
            )?;
            let actions = stmt
                .query_map(params![section.0], row_to_action)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(actions)
        })
        .await
    }

    async fn permissions(&self, category: &Category) -> Result<Vec<PermissionRecord>> {
        let category = category.name().to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT permission_id, name, category, created_by, created_at
                 FROM permissions WHERE category = ?1 ORDER BY name",
            )?;
            let permissions = stmt
                .query_map(params![category], row_to_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(permissions)
        })
        .await
    }

    async fn permission_by_name(
        &self,
        category: &Category,
        name: &str,
    ) -> Result<Option<PermissionRecord>> {
        let category = category.name().to_string();
        let name = name.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT permission_id, name, category, created_by, created_at
                 FROM permissions WHERE category = ?1 AND name = ?2",
                params![category, name],
                row_to_permission,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn search_permissions(&self, needle: &str) -> Result<Vec<PermissionRecord>> {
        // `%` and `_` are legal name characters; escape them so they match
        // literally instead of acting as LIKE wildcards.
        let escaped = needle
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT permission_id, name, category, created_by, created_at
                 FROM permissions WHERE name LIKE ?1 ESCAPE '\\' ORDER BY category, name",
            )?;
            let permissions = stmt
                .query_map(params![pattern], row_to_permission)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(permissions)
        })
        .await
    }

    async fn grants_for(&self, recipient: Recipient) -> Result<Vec<GrantRecord>> {
        let (kind, id) = recipient_parts(recipient);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GRANT_COLUMNS} FROM grants
                 WHERE recipient_kind = ?1 AND recipient_id = ?2 ORDER BY grant_id"
            ))?;
            let rows = stmt
                .query_map(params![kind, id], row_to_grant)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_grant).collect()
        })
        .await
    }

    async fn grants_of_permission(&self, permission: PermissionId) -> Result<Vec<GrantRecord>> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {GRANT_COLUMNS} FROM grants
                 WHERE permission_id = ?1 ORDER BY grant_id"
            ))?;
            let rows = stmt
                .query_map(params![permission.0], row_to_grant)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_grant).collect()
        })
        .await
    }

    async fn user_has_grant(
        &self,
        user: UserId,
        permission: PermissionId,
        object: Option<ObjectId>,
    ) -> Result<bool> {
        self.run(move |conn| {
            let exists: bool = match object {
                Some(object) => conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM grants
                        WHERE recipient_kind = 'user' AND recipient_id = ?1
                          AND permission_id = ?2
                          AND (object_id IS NULL OR object_id = ?3)
                     )",
                    params![user.0, permission.0, object.0],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT EXISTS(
                        SELECT 1 FROM grants
                        WHERE recipient_kind = 'user' AND recipient_id = ?1
                          AND permission_id = ?2 AND object_id IS NULL
                     )",
                    params![user.0, permission.0],
                    |row| row.get(0),
                )?,
            };
            Ok(exists)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Identity writes
    // ─────────────────────────────────────────────────────────────────────

    async fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        self.ensure_writable()?;
        let user = user.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (user_id, name, active) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    name = excluded.name,
                    active = excluded.active",
                params![user.id.0, user.name, user.active as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_team(&self, team: &TeamRecord) -> Result<()> {
        self.ensure_writable()?;
        let team = team.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO teams (team_id, name) VALUES (?1, ?2)
                 ON CONFLICT(team_id) DO UPDATE SET name = excluded.name",
                params![team.id.0, team.name],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_user(&self, user: UserId) -> Result<()> {
        self.ensure_writable()?;
        self.run(move |conn| {
            conn.execute("DELETE FROM users WHERE user_id = ?1", params![user.0])?;
            Ok(())
        })
        .await
    }

    async fn delete_team(&self, team: TeamId) -> Result<()> {
        self.ensure_writable()?;
        self.run(move |conn| {
            conn.execute("DELETE FROM teams WHERE team_id = ?1", params![team.0])?;
            Ok(())
        })
        .await
    }

    async fn set_user_active(&self, user: UserId, active: bool) -> Result<()> {
        self.ensure_writable()?;
        self.run(move |conn| {
            let affected = conn.execute(
                "UPDATE users SET active = ?1 WHERE user_id = ?2",
                params![active as i64, user.0],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("user {user}")));
            }
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Token / credential writes
    // ─────────────────────────────────────────────────────────────────────

    async fn insert_token(&self, token: &TokenRecord) -> Result<()> {
        self.ensure_writable()?;
        let token = token.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tokens (value, salt, valid_from, expires_at, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    token.value.0.as_slice(),
                    token.salt,
                    token.valid_from,
                    token.expires_at,
                    token.user.0,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn upsert_credential(&self, credential: &CredentialRecord) -> Result<()> {
        self.ensure_writable()?;
        let credential = credential.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO credentials (user_id, material, expires_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    material = excluded.material,
                    expires_at = excluded.expires_at",
                params![credential.user.0, credential.material, credential.expires_at],
            )?;
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permission graph writes
    // ─────────────────────────────────────────────────────────────────────

    async fn category_add(&self, name: &Category, actor: UserId, now: i64) -> Result<PermissionId> {
        self.ensure_writable()?;
        let name = name.primary();
        self.run(move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT name FROM categories WHERE name = ?1",
                    params![name.name()],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Err(StoreError::AlreadyExists(format!("category {name}")));
            }

            let tx = conn.transaction()?;

            // The category, its grant machinery, and the system permission
            // controlling grants within it commit together or not at all.
            tx.execute(
                "INSERT INTO categories (name, created_by, created_at) VALUES (?1, ?2, ?3)",
                params![name.name(), actor.0, now],
            )?;
            tx.execute(
                "INSERT INTO categories (name, created_by, created_at) VALUES (?1, ?2, ?3)",
                params![name.grant_meta().name(), actor.0, now],
            )?;
            tx.execute(
                "INSERT INTO permissions (name, category, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name.name(), SYSTEM_CATEGORY, actor.0, now],
            )?;
            let system_permission = PermissionId(tx.last_insert_rowid());

            tx.commit()?;
            tracing::debug!(category = %name, "category created");
            Ok(system_permission)
        })
        .await
    }

    async fn category_remove(&self, name: &Category) -> Result<()> {
        self.ensure_writable()?;
        let name = name.primary();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            // (a) every section of the category, cascading to actions.
            let section_ids: Vec<i64> = {
                let mut stmt =
                    tx.prepare("SELECT section_id FROM sections WHERE category = ?1")?;
                let ids = stmt
                    .query_map(params![name.name()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                ids
            };

            let mut plan = TxPlan::new();
            for section_id in section_ids {
                plan = section_teardown_steps(&tx, plan, SectionId(section_id))?;
            }

            // (b) every permission bound to the category, grants first.
            let permission_names: Vec<String> = {
                let mut stmt = tx.prepare("SELECT name FROM permissions WHERE category = ?1")?;
                let names = stmt
                    .query_map(params![name.name()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                names
            };
            for permission_name in &permission_names {
                let primary = permission_id_in_tx(&tx, name.name(), permission_name)?
                    .ok_or_else(|| StoreError::NotFound(format!("permission {permission_name}")))?;
                let meta: i64 = tx.query_row(
                    "SELECT meta_id FROM permission_links WHERE primary_id = ?1",
                    params![primary.0],
                    |row| row.get(0),
                )?;
                plan = permission_teardown_steps(plan, primary, PermissionId(meta));
            }

            // (c)+(d) the category's auto-created system permission and its
            // grants.
            let system_permission = permission_id_in_tx(&tx, SYSTEM_CATEGORY, name.name())?
                .ok_or_else(|| StoreError::NotFound(format!("system permission {name}")))?;
            plan = plan
                .step(
                    "DELETE FROM grants WHERE permission_id = ?1",
                    vec![param(system_permission.0)],
                    ExpectedRows::Any,
                )
                .step(
                    "DELETE FROM permissions WHERE permission_id = ?1",
                    vec![param(system_permission.0)],
                    ExpectedRows::Exactly(1),
                )
                // (e) the grant meta-category, (f) the category itself.
                .step(
                    "DELETE FROM categories WHERE name = ?1",
                    vec![param(name.grant_meta().name().to_string())],
                    ExpectedRows::Exactly(1),
                )
                .step(
                    "DELETE FROM categories WHERE name = ?1",
                    vec![param(name.name().to_string())],
                    ExpectedRows::Exactly(1),
                );

            plan.run(&tx)?;
            tx.commit()?;
            tracing::debug!(category = %name, "category removed");
            Ok(())
        })
        .await
    }

    async fn section_add(&self, category: &Category, name: &str) -> Result<SectionId> {
        self.ensure_writable()?;
        let category = category.name().to_string();
        let name = name.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sections (name, category) VALUES (?1, ?2)",
                params![name, category],
            )?;
            Ok(SectionId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn section_remove(&self, section: SectionId) -> Result<()> {
        self.ensure_writable()?;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let plan = section_teardown_steps(&tx, TxPlan::new(), section)?;
            plan.run(&tx)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn action_add(&self, section: SectionId, name: &str) -> Result<ActionId> {
        self.ensure_writable()?;
        let name = name.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO actions (name, section_id) VALUES (?1, ?2)",
                params![name, section.0],
            )?;
            Ok(ActionId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn action_remove(&self, action: ActionId) -> Result<()> {
        self.ensure_writable()?;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            TxPlan::new()
                .step(
                    "DELETE FROM permission_actions WHERE action_id = ?1",
                    vec![param(action.0)],
                    ExpectedRows::Any,
                )
                .step(
                    "DELETE FROM actions WHERE action_id = ?1",
                    vec![param(action.0)],
                    ExpectedRows::Exactly(1),
                )
                .run(&tx)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn permission_add(
        &self,
        category: &Category,
        name: &str,
        actor: UserId,
        now: i64,
    ) -> Result<(PermissionId, PermissionId)> {
        self.ensure_writable()?;
        let category = category.primary();
        let name = name.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            if permission_id_in_tx(&tx, category.name(), &name)?.is_some() {
                return Err(StoreError::AlreadyExists(format!(
                    "permission {category}/{name}"
                )));
            }

            // Primary permission, its shadow in the grant meta-category, and
            // the link between them are one atomic unit.
            tx.execute(
                "INSERT INTO permissions (name, category, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, category.name(), actor.0, now],
            )?;
            let primary = PermissionId(tx.last_insert_rowid());

            tx.execute(
                "INSERT INTO permissions (name, category, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, category.grant_meta().name(), actor.0, now],
            )?;
            let meta = PermissionId(tx.last_insert_rowid());

            tx.execute(
                "INSERT INTO permission_links (primary_id, meta_id) VALUES (?1, ?2)",
                params![primary.0, meta.0],
            )?;

            tx.commit()?;
            Ok((primary, meta))
        })
        .await
    }

    async fn permission_remove(&self, category: &Category, name: &str) -> Result<()> {
        self.ensure_writable()?;
        let category = category.primary();
        let name = name.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;

            let primary = permission_id_in_tx(&tx, category.name(), &name)?
                .ok_or_else(|| StoreError::NotFound(format!("permission {category}/{name}")))?;
            let meta: i64 = tx.query_row(
                "SELECT meta_id FROM permission_links WHERE primary_id = ?1",
                params![primary.0],
                |row| row.get(0),
            )?;

            permission_teardown_steps(TxPlan::new(), primary, PermissionId(meta)).run(&tx)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn grant_insert(
        &self,
        recipient: Recipient,
        permission: PermissionId,
        category: &Category,
        object: Option<ObjectId>,
    ) -> Result<GrantId> {
        self.ensure_writable()?;
        let category = category.clone();
        let (kind, recipient_id) = recipient_parts(recipient);
        self.run(move |conn| {
            let duplicate: bool = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM grants
                    WHERE recipient_kind = ?1 AND recipient_id = ?2
                      AND permission_id = ?3 AND category = ?4
                      AND object_id IS ?5
                 )",
                params![
                    kind,
                    recipient_id,
                    permission.0,
                    category.name(),
                    object.map(|o| o.0)
                ],
                |row| row.get(0),
            )?;
            if duplicate {
                return Err(StoreError::AlreadyExists(format!(
                    "grant of permission {permission} in {category}"
                )));
            }

            conn.execute(
                "INSERT INTO grants
                    (recipient_kind, recipient_id, permission_id, category, object_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    kind,
                    recipient_id,
                    permission.0,
                    category.name(),
                    object.map(|o| o.0)
                ],
            )?;
            Ok(GrantId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn grant_revoke(
        &self,
        grant: GrantId,
        permission: PermissionId,
        category: &Category,
    ) -> Result<()> {
        self.ensure_writable()?;
        let category = category.clone();
        self.run(move |conn| {
            // The full triple must match; a grant id alone could collide
            // across categories.
            let affected = conn.execute(
                "DELETE FROM grants
                 WHERE grant_id = ?1 AND permission_id = ?2 AND category = ?3",
                params![grant.0, permission.0, category.name()],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!(
                    "grant {grant} of permission {permission} in {category}"
                )));
            }
            Ok(())
        })
        .await
    }
}
