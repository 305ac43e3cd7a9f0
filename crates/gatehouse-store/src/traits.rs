//! AuthStore trait: the abstract interface for auth persistence.
//!
//! The relational store is the source of truth for identities, tokens,
//! credentials, and the permission/grant graph. All in-memory maps are
//! derived caches rebuilt from it.

use async_trait::async_trait;

use gatehouse_core::{
    ActionId, ActionRecord, Category, CategoryRecord, CredentialRecord, GrantId, GrantRecord,
    InstanceMode, ObjectId, PermissionId, PermissionRecord, Recipient, SectionId, SectionRecord,
    TeamId, TeamRecord, TokenRecord, TokenValue, UserId, UserRecord,
};

use crate::error::Result;

/// Async interface for auth persistence.
///
/// # Design notes
///
/// - Multi-statement mutations (`category_add`, `category_remove`,
///   `permission_add`, `permission_remove`) are atomic: partial application
///   is a correctness bug, so any sub-step failure or unexpected affected-row
///   count rolls the whole transaction back.
/// - Every write refuses with `StoreError::ReadOnly` on a read-only instance
///   before executing any statement.
/// - `grant_revoke` matches the full `{grant, permission, category}` triple,
///   never the grant id alone.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// The instance mode this store was opened with.
    fn mode(&self) -> InstanceMode;

    // ─────────────────────────────────────────────────────────────────────
    // Identity reads
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a user by id.
    async fn user_by_id(&self, id: UserId) -> Result<Option<UserRecord>>;

    /// Look up a user by name.
    async fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>>;

    /// Snapshot all users (cache warm-up).
    async fn users(&self) -> Result<Vec<UserRecord>>;

    /// Snapshot all teams (cache warm-up).
    async fn teams(&self) -> Result<Vec<TeamRecord>>;

    // ─────────────────────────────────────────────────────────────────────
    // Token / credential reads
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a token by its presented value (read-only lazy backfill path).
    async fn token_by_value(&self, value: &TokenValue) -> Result<Option<TokenRecord>>;

    /// Snapshot all tokens (full-instance cache warm-up).
    async fn tokens(&self) -> Result<Vec<TokenRecord>>;

    /// Look up the credential material for a user.
    async fn credential_for_user(&self, user: UserId) -> Result<Option<CredentialRecord>>;

    // ─────────────────────────────────────────────────────────────────────
    // Permission graph reads
    // ─────────────────────────────────────────────────────────────────────

    /// Look up a category by name.
    async fn category(&self, name: &Category) -> Result<Option<CategoryRecord>>;

    /// List every category (primaries and grant meta-categories).
    async fn categories(&self) -> Result<Vec<CategoryRecord>>;

    /// List the sections of a category.
    async fn sections(&self, category: &Category) -> Result<Vec<SectionRecord>>;

    /// List the actions of a section.
    async fn actions(&self, section: SectionId) -> Result<Vec<ActionRecord>>;

    /// List the permissions of a category.
    async fn permissions(&self, category: &Category) -> Result<Vec<PermissionRecord>>;

    /// Look up one permission by category and name.
    async fn permission_by_name(
        &self,
        category: &Category,
        name: &str,
    ) -> Result<Option<PermissionRecord>>;

    /// Substring search over permission names.
    async fn search_permissions(&self, needle: &str) -> Result<Vec<PermissionRecord>>;

    /// List the grants held by a recipient.
    async fn grants_for(&self, recipient: Recipient) -> Result<Vec<GrantRecord>>;

    /// List the grants of a permission.
    async fn grants_of_permission(&self, permission: PermissionId) -> Result<Vec<GrantRecord>>;

    /// Whether a user holds a grant of a permission, optionally bound to an
    /// object (authorize fallback on read-only instances).
    async fn user_has_grant(
        &self,
        user: UserId,
        permission: PermissionId,
        object: Option<ObjectId>,
    ) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────
    // Identity writes
    // ─────────────────────────────────────────────────────────────────────

    /// Insert or update a user row.
    async fn upsert_user(&self, user: &UserRecord) -> Result<()>;

    /// Insert or update a team row.
    async fn upsert_team(&self, team: &TeamRecord) -> Result<()>;

    /// Delete a user row.
    async fn delete_user(&self, user: UserId) -> Result<()>;

    /// Delete a team row.
    async fn delete_team(&self, team: TeamId) -> Result<()>;

    /// Flip a user's active flag.
    async fn set_user_active(&self, user: UserId, active: bool) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Token / credential writes
    // ─────────────────────────────────────────────────────────────────────

    /// Store a freshly issued token. Tokens are never updated in place.
    async fn insert_token(&self, token: &TokenRecord) -> Result<()>;

    /// Insert or replace a user's credential material.
    async fn upsert_credential(&self, credential: &CredentialRecord) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Permission graph writes (transactional)
    // ─────────────────────────────────────────────────────────────────────

    /// Create a category, its `<name>:grant` meta-category, and the system
    /// permission named after it, atomically. Returns the system permission
    /// id.
    async fn category_add(&self, name: &Category, actor: UserId, now: i64) -> Result<PermissionId>;

    /// Tear down a category and everything inside it, atomically: sections
    /// (with their actions and permission-action links), permissions (grants
    /// first, shadow and link included), the grants of its system
    /// permission, the system permission, the meta-category, the category.
    async fn category_remove(&self, name: &Category) -> Result<()>;

    /// Create a section under a category.
    async fn section_add(&self, category: &Category, name: &str) -> Result<SectionId>;

    /// Remove a section, cascading to its actions and their permission-map
    /// links.
    async fn section_remove(&self, section: SectionId) -> Result<()>;

    /// Create an action under a section.
    async fn action_add(&self, section: SectionId, name: &str) -> Result<ActionId>;

    /// Remove an action and its permission-map links.
    async fn action_remove(&self, action: ActionId) -> Result<()>;

    /// Create a permission and its shadow in the category's grant
    /// meta-category, linked, atomically. Returns `(primary, meta)` ids.
    async fn permission_add(
        &self,
        category: &Category,
        name: &str,
        actor: UserId,
        now: i64,
    ) -> Result<(PermissionId, PermissionId)>;

    /// Remove a permission, its shadow, their link, and every grant of
    /// either, atomically.
    async fn permission_remove(&self, category: &Category, name: &str) -> Result<()>;

    /// Insert a grant edge.
    async fn grant_insert(
        &self,
        recipient: Recipient,
        permission: PermissionId,
        category: &Category,
        object: Option<ObjectId>,
    ) -> Result<GrantId>;

    /// Revoke a grant, matching the full `{grant, permission, category}`
    /// triple.
    async fn grant_revoke(
        &self,
        grant: GrantId,
        permission: PermissionId,
        category: &Category,
    ) -> Result<()>;
}
