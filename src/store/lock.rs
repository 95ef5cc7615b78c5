use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

/// Exclusive lock guarding one key's load-merge-replace section.
pub type KeyLock = Arc<Mutex<()>>;

/// Registry of per-key locks. The map itself is only locked long enough to
/// fetch or insert a key's lock, so writers of different keys never wait on
/// each other.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: RwLock<HashMap<String, KeyLock>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `key`, created on first use. Every call for the same
    /// key returns the same underlying mutex.
    pub fn get(&self, key: &str) -> KeyLock {
        {
            let map_r = self.locks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(lock) = map_r.get(key) {
                return Arc::clone(lock);
            }
        }
        let mut map_w = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        // another writer may have inserted it between the two locks
        Arc::clone(map_w.entry(key.to_string()).or_default())
    }

    pub fn len(&self) -> usize {
        self.locks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
