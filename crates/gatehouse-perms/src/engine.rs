//! The permission engine: category, section, action, permission, and grant
//! lifecycle, plus the hot authorize path.
//!
//! All mutations go through the store's transactional operations; the
//! in-memory maps are patched only after a commit. Scope dispatch is driven
//! by the category name: well-known categories bind grants to an object,
//! everything else is instance-wide.

use std::collections::HashSet;
use std::sync::Arc;

use gatehouse_core::{
    ActionId, ActionRecord, Category, CategoryRecord, GrantId, GrantRecord, InstanceMode,
    NameDirectory, ObjectId, PermissionId, PermissionRecord, Recipient, SectionId, SectionRecord,
    UserId, Verdict, BUILTIN_CATEGORIES, SYSTEM_CATEGORY,
};
use gatehouse_store::{AuthStore, StoreError};

use crate::error::{PermsError, Result};
use crate::maps::GrantMaps;

/// Longest accepted category or permission name.
const MAX_NAME_LEN: usize = 255;

fn qualified(category: &Category, name: &str) -> String {
    format!("{}/{}", category.name(), name)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PermsError::BadRequest("empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PermsError::BadRequest("name too long"));
    }
    if name.contains(':') || name.contains('/') {
        return Err(PermsError::BadRequest("name contains reserved character"));
    }
    Ok(())
}

/// Category/permission/grant engine over an auth store.
///
/// Cheap to clone; clones share the caches.
#[derive(Clone)]
pub struct PermissionEngine {
    store: Arc<dyn AuthStore>,
    grants: GrantMaps,
    names: NameDirectory<PermissionId>,
    mode: InstanceMode,
}

impl PermissionEngine {
    /// Create an engine over a store.
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        let mode = store.mode();
        Self {
            store,
            grants: GrantMaps::new(),
            names: NameDirectory::new(),
            mode,
        }
    }

    /// Create the built-in categories that are missing.
    ///
    /// Idempotent; run at startup on full instances. The `system` category
    /// goes first since every other category's auto-created permission
    /// lands in it.
    pub async fn bootstrap(&self, actor: UserId, now: i64) -> Result<()> {
        let system = Category::new(SYSTEM_CATEGORY);
        if self.store.category(&system).await?.is_none() {
            self.category_add(&system, actor, now).await?;
        }
        for name in BUILTIN_CATEGORIES {
            let category = Category::new(*name);
            if self.store.category(&category).await?.is_none() {
                self.category_add(&category, actor, now).await?;
            }
        }
        Ok(())
    }

    /// Rebuild the grant maps and name directory from the store.
    pub async fn warm(&self) -> Result<()> {
        self.grants.clear();
        for category in self.store.categories().await? {
            for permission in self.store.permissions(&category.name).await? {
                self.names
                    .upsert(permission.id, &qualified(&permission.category, &permission.name));
                for grant in self.store.grants_of_permission(permission.id).await? {
                    self.grants.apply(&grant);
                }
            }
        }
        tracing::info!(
            global = self.grants.global_len(),
            limited = self.grants.limited_len(),
            "grant maps warmed"
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Category lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Create a category, its grant meta-category, and its system
    /// permission.
    pub async fn category_add(&self, name: &Category, actor: UserId, now: i64) -> Result<()> {
        if name.is_grant_meta() {
            return Err(PermsError::BadRequest("grant suffix is reserved"));
        }
        validate_name(name.name())?;

        let system_permission = self.store.category_add(name, actor, now).await?;
        self.names.upsert(
            system_permission,
            &qualified(&Category::new(SYSTEM_CATEGORY), name.name()),
        );
        tracing::info!(category = %name, "category added");
        Ok(())
    }

    /// Tear a category down, then purge every cache entry it touched.
    pub async fn category_remove(&self, name: &Category) -> Result<()> {
        let name = name.primary();
        if name.name() == SYSTEM_CATEGORY {
            return Err(PermsError::BadRequest("the system category is permanent"));
        }
        if self.store.category(&name).await?.is_none() {
            return Err(StoreError::NotFound(format!("category {name}")).into());
        }

        // Gather the permission ids first; after the transaction commits
        // there is nothing left to query.
        let mut doomed: HashSet<PermissionId> = HashSet::new();
        for permission in self.store.permissions(&name).await? {
            doomed.insert(permission.id);
        }
        for permission in self.store.permissions(&name.grant_meta()).await? {
            doomed.insert(permission.id);
        }
        if let Some(system_permission) = self
            .store
            .permission_by_name(&Category::new(SYSTEM_CATEGORY), name.name())
            .await?
        {
            doomed.insert(system_permission.id);
        }

        self.store.category_remove(&name).await?;

        self.grants.purge_permissions(&doomed);
        for id in doomed {
            self.names.remove(id);
        }
        tracing::info!(category = %name, "category removed");
        Ok(())
    }

    /// List every category row, grant meta-categories included.
    pub async fn categories(&self) -> Result<Vec<CategoryRecord>> {
        Ok(self.store.categories().await?)
    }

    /// Look up one category.
    pub async fn category(&self, name: &Category) -> Result<Option<CategoryRecord>> {
        Ok(self.store.category(name).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sections and actions
    // ─────────────────────────────────────────────────────────────────────

    /// Create a section under an existing category.
    pub async fn section_add(&self, category: &Category, name: &str) -> Result<SectionId> {
        validate_name(name)?;
        self.require_category(category).await?;
        Ok(self.store.section_add(category, name).await?)
    }

    /// Remove a section and its actions.
    pub async fn section_remove(&self, section: SectionId) -> Result<()> {
        Ok(self.store.section_remove(section).await?)
    }

    /// List the sections of a category.
    pub async fn sections(&self, category: &Category) -> Result<Vec<SectionRecord>> {
        self.require_category(category).await?;
        Ok(self.store.sections(category).await?)
    }

    /// Create an action under a section.
    pub async fn action_add(&self, section: SectionId, name: &str) -> Result<ActionId> {
        validate_name(name)?;
        Ok(self.store.action_add(section, name).await?)
    }

    /// Remove an action.
    pub async fn action_remove(&self, action: ActionId) -> Result<()> {
        Ok(self.store.action_remove(action).await?)
    }

    /// List the actions of a section.
    pub async fn actions(&self, section: SectionId) -> Result<Vec<ActionRecord>> {
        Ok(self.store.actions(section).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permission lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Create a permission and its shadow in the grant meta-category.
    pub async fn permission_add(
        &self,
        category: &Category,
        name: &str,
        actor: UserId,
        now: i64,
    ) -> Result<(PermissionId, PermissionId)> {
        validate_name(name)?;
        let category = category.primary();
        self.require_category(&category).await?;

        let (primary, meta) = self.store.permission_add(&category, name, actor, now).await?;
        self.names.upsert(primary, &qualified(&category, name));
        self.names.upsert(meta, &qualified(&category.grant_meta(), name));
        tracing::info!(category = %category, permission = name, "permission added");
        Ok((primary, meta))
    }

    /// Remove a permission, its shadow, and every grant of either.
    pub async fn permission_remove(&self, category: &Category, name: &str) -> Result<()> {
        let category = category.primary();

        let primary = self
            .store
            .permission_by_name(&category, name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("permission {category}/{name}")))?;
        let meta = self
            .store
            .permission_by_name(&category.grant_meta(), name)
            .await?;

        self.store.permission_remove(&category, name).await?;

        let mut doomed = HashSet::from([primary.id]);
        if let Some(meta) = &meta {
            doomed.insert(meta.id);
        }
        self.grants.purge_permissions(&doomed);
        for id in doomed {
            self.names.remove(id);
        }
        tracing::info!(category = %category, permission = name, "permission removed");
        Ok(())
    }

    /// List the permissions of a category.
    pub async fn permissions(&self, category: &Category) -> Result<Vec<PermissionRecord>> {
        self.require_category(category).await?;
        Ok(self.store.permissions(category).await?)
    }

    /// Look up one permission by category and name.
    pub async fn permission(
        &self,
        category: &Category,
        name: &str,
    ) -> Result<Option<PermissionRecord>> {
        Ok(self.store.permission_by_name(category, name).await?)
    }

    /// Substring search over permission names, across categories.
    pub async fn search(&self, needle: &str) -> Result<Vec<PermissionRecord>> {
        if needle.is_empty() {
            return Err(PermsError::BadRequest("empty search term"));
        }
        Ok(self.store.search_permissions(needle).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────

    /// Grant a permission to a recipient, dispatching on category scope.
    pub async fn right_grant(
        &self,
        recipient: Recipient,
        category: &Category,
        permission_name: &str,
        object: Option<ObjectId>,
    ) -> Result<GrantRecord> {
        let user = self.user_recipient(recipient)?;
        self.check_scope(category, object)?;
        let permission = self.resolve_permission(category, permission_name).await?;

        let id = self
            .store
            .grant_insert(recipient, permission, category, object)
            .await?;
        let grant = GrantRecord {
            id,
            recipient,
            permission,
            category: category.clone(),
            object,
        };
        self.grants.apply(&grant);

        tracing::info!(
            user = %user,
            category = %category,
            permission = permission_name,
            ?object,
            "grant added"
        );
        Ok(grant)
    }

    /// Revoke a grant. The `{grant, permission, category}` triple must
    /// match an existing row.
    pub async fn right_revoke(
        &self,
        recipient: Recipient,
        grant: GrantId,
        category: &Category,
        permission_name: &str,
    ) -> Result<()> {
        let user = self.user_recipient(recipient)?;
        let permission = self.resolve_permission(category, permission_name).await?;

        // The object of the doomed grant drives which map gets patched.
        let row = self
            .store
            .grants_of_permission(permission)
            .await?
            .into_iter()
            .find(|g| g.id == grant)
            .ok_or_else(|| StoreError::NotFound(format!("grant {grant}")))?;

        self.store.grant_revoke(grant, permission, category).await?;

        match row.object {
            Some(object) => self.grants.revoke_limited(user, object, permission),
            None => self.grants.revoke_global(user, permission),
        }

        tracing::info!(
            user = %user,
            category = %category,
            permission = permission_name,
            "grant revoked"
        );
        Ok(())
    }

    /// List the grants held by a recipient.
    pub async fn grants_for(&self, recipient: Recipient) -> Result<Vec<GrantRecord>> {
        Ok(self.store.grants_for(recipient).await?)
    }

    /// Decide whether a user may exercise a permission, optionally against
    /// an object.
    ///
    /// Maps first; read-only instances fall back to the store on a miss,
    /// since their caches trail the writer.
    pub async fn authorize(
        &self,
        user: UserId,
        category: &Category,
        permission_name: &str,
        object: Option<ObjectId>,
    ) -> Verdict {
        let permission = match self.resolve_permission(category, permission_name).await {
            Ok(permission) => permission,
            Err(PermsError::Store(StoreError::NotFound(_))) => return Verdict::NotFound,
            Err(e) => {
                tracing::error!(error = %e, "permission resolution failed during authorize");
                return Verdict::ServerError;
            }
        };

        if self.grants.has_global(user, permission) {
            return Verdict::Ok;
        }
        if let Some(object) = object {
            if self.grants.has_limited(user, object, permission) {
                return Verdict::Ok;
            }
        }

        if !self.mode.is_writable() {
            match self.store.user_has_grant(user, permission, object).await {
                Ok(true) => return Verdict::Ok,
                Ok(false) => return Verdict::Forbidden,
                Err(e) => {
                    tracing::error!(error = %e, "grant lookup failed during authorize");
                    return Verdict::ServerError;
                }
            }
        }

        Verdict::Forbidden
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn user_recipient(&self, recipient: Recipient) -> Result<UserId> {
        match recipient {
            Recipient::User(user) => Ok(user),
            Recipient::Team(_) => Err(PermsError::NotImplemented("team recipients")),
        }
    }

    fn check_scope(&self, category: &Category, object: Option<ObjectId>) -> Result<()> {
        match (category.scope().is_object_scoped(), object) {
            (true, None) => Err(PermsError::BadRequest("scoped category requires an object")),
            (false, Some(_)) => Err(PermsError::BadRequest(
                "unscoped category takes no object",
            )),
            _ => Ok(()),
        }
    }

    async fn resolve_permission(
        &self,
        category: &Category,
        name: &str,
    ) -> Result<PermissionId> {
        let key = qualified(category, name);
        if let Some(id) = self.names.id_of(&key) {
            return Ok(id);
        }
        match self.store.permission_by_name(category, name).await? {
            Some(record) => {
                self.names.upsert(record.id, &key);
                Ok(record.id)
            }
            None => Err(StoreError::NotFound(format!("permission {key}")).into()),
        }
    }

    async fn require_category(&self, category: &Category) -> Result<()> {
        if self.store.category(category).await?.is_none() {
            return Err(StoreError::NotFound(format!("category {category}")).into());
        }
        Ok(())
    }
}
