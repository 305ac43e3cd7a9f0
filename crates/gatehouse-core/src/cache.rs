//! Concurrent lookup caches.
//!
//! Every cache is a mutex-guarded map with its own lock. Writers take the
//! lock for the minimum critical section needed to mutate the map and
//! release it before any I/O; readers clone values out.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// A mutex-guarded map from stable keys to clonable values.
///
/// Cheap to clone; clones share the same underlying map.
#[derive(Debug)]
pub struct LockMap<K, V> {
    inner: Arc<Mutex<HashMap<K, V>>>,
}

impl<K, V> Clone for LockMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for LockMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash, V: Clone> LockMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, V>> {
        // A poisoned lock means a panic while holding it; the maps hold
        // rebuildable cache rows, so continuing with the data is sound.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clone out the value for a key.
    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.lock().insert(key, value)
    }

    /// Remove a key, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().remove(key)
    }

    /// Remove and return the value only if `pred` holds for it.
    pub fn remove_if(&self, key: &K, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        let mut map = self.lock();
        if map.get(key).is_some_and(|v| pred(v)) {
            map.remove(key)
        } else {
            None
        }
    }

    /// Keep only entries satisfying the predicate.
    pub fn retain(&self, pred: impl FnMut(&K, &mut V) -> bool) {
        self.lock().retain(pred);
    }

    /// Mutate the value for a key in place, inserting a default first.
    pub fn update_or_default(&self, key: K, f: impl FnOnce(&mut V))
    where
        V: Default,
    {
        let mut map = self.lock();
        f(map.entry(key).or_default());
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clear every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Snapshot all keys.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.lock().keys().cloned().collect()
    }
}

/// Paired id->name and name->id caches for one identity kind.
///
/// Derived, rebuildable rows; the relational store is the source of truth.
#[derive(Debug, Default)]
pub struct NameDirectory<I> {
    by_id: LockMap<I, String>,
    by_name: LockMap<String, I>,
}

impl<I> Clone for NameDirectory<I> {
    fn clone(&self) -> Self {
        Self {
            by_id: self.by_id.clone(),
            by_name: self.by_name.clone(),
        }
    }
}

impl<I: Copy + Eq + Hash> NameDirectory<I> {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            by_id: LockMap::new(),
            by_name: LockMap::new(),
        }
    }

    /// Resolve a name from an id.
    pub fn name_of(&self, id: I) -> Option<String> {
        self.by_id.get(&id)
    }

    /// Resolve an id from a name.
    pub fn id_of(&self, name: &str) -> Option<I> {
        self.by_name.get(&name.to_string())
    }

    /// Insert or update both directions.
    ///
    /// On rename the reverse entry is removed under its old name before the
    /// new one is inserted, so stale names never resolve.
    pub fn upsert(&self, id: I, name: &str) {
        if let Some(old) = self.by_id.insert(id, name.to_string()) {
            if old != name {
                self.by_name.remove(&old);
            }
        }
        self.by_name.insert(name.to_string(), id);
    }

    /// Remove both directions for an id.
    pub fn remove(&self, id: I) {
        if let Some(name) = self.by_id.remove(&id) {
            self.by_name.remove(&name);
        }
    }

    /// Number of identities known.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the directory is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    #[test]
    fn test_lockmap_basic_ops() {
        let map: LockMap<u64, String> = LockMap::new();
        assert!(map.is_empty());

        map.insert(1, "one".into());
        map.insert(2, "two".into());
        assert_eq!(map.get(&1).as_deref(), Some("one"));
        assert_eq!(map.len(), 2);

        map.remove(&1);
        assert!(map.get(&1).is_none());
    }

    #[test]
    fn test_lockmap_remove_if() {
        let map: LockMap<u64, i64> = LockMap::new();
        map.insert(1, 10);

        assert!(map.remove_if(&1, |v| *v > 100).is_none());
        assert!(map.contains(&1));

        assert_eq!(map.remove_if(&1, |v| *v == 10), Some(10));
        assert!(!map.contains(&1));
    }

    #[test]
    fn test_lockmap_clones_share_state() {
        let a: LockMap<u64, u64> = LockMap::new();
        let b = a.clone();
        a.insert(5, 50);
        assert_eq!(b.get(&5), Some(50));
    }

    #[test]
    fn test_directory_rename_drops_old_reverse_entry() {
        let dir: NameDirectory<UserId> = NameDirectory::new();
        dir.upsert(UserId(1), "alice");

        assert_eq!(dir.id_of("alice"), Some(UserId(1)));

        dir.upsert(UserId(1), "alicia");
        assert_eq!(dir.name_of(UserId(1)).as_deref(), Some("alicia"));
        assert_eq!(dir.id_of("alicia"), Some(UserId(1)));
        // The old name must no longer resolve.
        assert_eq!(dir.id_of("alice"), None);
    }

    #[test]
    fn test_directory_remove() {
        let dir: NameDirectory<UserId> = NameDirectory::new();
        dir.upsert(UserId(7), "ops-team-bot");
        dir.remove(UserId(7));

        assert!(dir.name_of(UserId(7)).is_none());
        assert!(dir.id_of("ops-team-bot").is_none());
        assert!(dir.is_empty());
    }
}
