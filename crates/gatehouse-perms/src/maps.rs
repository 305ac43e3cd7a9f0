//! In-memory grant lookup maps.
//!
//! Two maps answer the hot authorize path without touching the database:
//! a global map for unscoped grants and a limited map keyed by
//! `(user, object)` for scoped ones. Both are derived caches; they are
//! patched only after the corresponding store transaction commits.

use std::collections::HashSet;

use gatehouse_core::{GrantRecord, LockMap, ObjectId, PermissionId, Recipient, UserId};

/// The pair of grant caches. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct GrantMaps {
    global: LockMap<UserId, HashSet<PermissionId>>,
    limited: LockMap<(UserId, ObjectId), HashSet<PermissionId>>,
}

impl GrantMaps {
    /// Create empty maps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unscoped grant.
    pub fn grant_global(&self, user: UserId, permission: PermissionId) {
        self.global.update_or_default(user, |set| {
            set.insert(permission);
        });
    }

    /// Record a grant limited to one object.
    pub fn grant_limited(&self, user: UserId, object: ObjectId, permission: PermissionId) {
        self.limited.update_or_default((user, object), |set| {
            set.insert(permission);
        });
    }

    /// Drop an unscoped grant.
    pub fn revoke_global(&self, user: UserId, permission: PermissionId) {
        self.global.update_or_default(user, |set| {
            set.remove(&permission);
        });
        self.global.remove_if(&user, |set| set.is_empty());
    }

    /// Drop a limited grant.
    pub fn revoke_limited(&self, user: UserId, object: ObjectId, permission: PermissionId) {
        self.limited.update_or_default((user, object), |set| {
            set.remove(&permission);
        });
        self.limited.remove_if(&(user, object), |set| set.is_empty());
    }

    /// Whether a user holds an unscoped grant of a permission.
    pub fn has_global(&self, user: UserId, permission: PermissionId) -> bool {
        self.global
            .get(&user)
            .is_some_and(|set| set.contains(&permission))
    }

    /// Whether a user holds a grant of a permission limited to an object.
    pub fn has_limited(&self, user: UserId, object: ObjectId, permission: PermissionId) -> bool {
        self.limited
            .get(&(user, object))
            .is_some_and(|set| set.contains(&permission))
    }

    /// Apply one committed grant row.
    pub fn apply(&self, grant: &GrantRecord) {
        // Team grants are not cached; grant paths refuse them upstream.
        let Recipient::User(user) = grant.recipient else {
            return;
        };
        match grant.object {
            Some(object) => self.grant_limited(user, object, grant.permission),
            None => self.grant_global(user, grant.permission),
        }
    }

    /// Drop every cached grant of the given permissions, both maps.
    ///
    /// Used after a permission or category teardown commits.
    pub fn purge_permissions(&self, permissions: &HashSet<PermissionId>) {
        self.global.retain(|_, set| {
            set.retain(|p| !permissions.contains(p));
            !set.is_empty()
        });
        self.limited.retain(|_, set| {
            set.retain(|p| !permissions.contains(p));
            !set.is_empty()
        });
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.global.clear();
        self.limited.clear();
    }

    /// Number of users with at least one unscoped grant.
    pub fn global_len(&self) -> usize {
        self.global.len()
    }

    /// Number of `(user, object)` pairs with at least one limited grant.
    pub fn limited_len(&self) -> usize {
        self.limited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_grant_revoke() {
        let maps = GrantMaps::new();
        maps.grant_global(UserId(1), PermissionId(10));

        assert!(maps.has_global(UserId(1), PermissionId(10)));
        assert!(!maps.has_global(UserId(1), PermissionId(11)));
        assert!(!maps.has_global(UserId(2), PermissionId(10)));

        maps.revoke_global(UserId(1), PermissionId(10));
        assert!(!maps.has_global(UserId(1), PermissionId(10)));
        // The empty set was dropped from the map entirely.
        assert_eq!(maps.global_len(), 0);
    }

    #[test]
    fn test_limited_grant_is_object_specific() {
        let maps = GrantMaps::new();
        maps.grant_limited(UserId(1), ObjectId(7), PermissionId(10));

        assert!(maps.has_limited(UserId(1), ObjectId(7), PermissionId(10)));
        assert!(!maps.has_limited(UserId(1), ObjectId(8), PermissionId(10)));
        assert!(!maps.has_global(UserId(1), PermissionId(10)));
    }

    #[test]
    fn test_purge_permissions_sweeps_both_maps() {
        let maps = GrantMaps::new();
        maps.grant_global(UserId(1), PermissionId(10));
        maps.grant_global(UserId(1), PermissionId(11));
        maps.grant_limited(UserId(2), ObjectId(5), PermissionId(10));

        maps.purge_permissions(&HashSet::from([PermissionId(10)]));

        assert!(!maps.has_global(UserId(1), PermissionId(10)));
        assert!(maps.has_global(UserId(1), PermissionId(11)));
        assert!(!maps.has_limited(UserId(2), ObjectId(5), PermissionId(10)));
        assert_eq!(maps.limited_len(), 0);
    }
}
