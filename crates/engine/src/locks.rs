//! Per-key admission locks and the shared running-set.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use cronhost_core::types::DbId;

/// Lazily created async mutexes, one per key.
///
/// Lock objects are created on first use and kept for the lifetime of the
/// process. The set of keys is small (one per script), so nothing is
/// reclaimed.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for `key`. Callers hold the returned
    /// `Arc` and lock it outside the registry mutex.
    pub fn get(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock registry poisoned");
        locks.entry(key.clone()).or_default().clone()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared set of script ids with an execution currently in flight.
///
/// The executor inserts under its admission lock; the environment manager
/// consults it to refuse destructive operations on a busy script.
#[derive(Clone, Default)]
pub struct RunningSet {
    inner: Arc<Mutex<HashSet<DbId>>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a script as running. Returns `false` if it already was.
    pub fn insert(&self, script_id: DbId) -> bool {
        self.inner.lock().expect("running set poisoned").insert(script_id)
    }

    pub fn remove(&self, script_id: DbId) {
        self.inner.lock().expect("running set poisoned").remove(&script_id);
    }

    pub fn contains(&self, script_id: DbId) -> bool {
        self.inner
            .lock()
            .expect("running set poisoned")
            .contains(&script_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_set_insert_is_exclusive() {
        let set = RunningSet::new();
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert!(set.contains(1));
        set.remove(1);
        assert!(!set.contains(1));
        assert!(set.insert(1));
    }

    #[tokio::test]
    async fn keyed_locks_serialize_per_key() {
        let locks = KeyedLocks::new();
        let a = locks.get(&1);
        let b = locks.get(&1);
        let guard = a.lock().await;
        // Same key resolves to the same mutex.
        assert!(b.try_lock().is_err());
        drop(guard);
        assert!(b.try_lock().is_ok());
        // Different key is independent.
        assert!(locks.get(&2).try_lock().is_ok());
    }
}
