use std::{
    collections::BTreeMap,
    sync::{PoisonError, RwLock},
};

use super::{Backend, KeyLock, Location, LockRegistry};
use crate::error::StoreError;

/// Process-local backend. Replacing a value under the map's write lock is
/// atomic for readers.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    artifacts: RwLock<BTreeMap<String, String>>,
    locks: LockRegistry,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw artifact content, bypassing the merge path.
    pub fn insert_raw(&self, key: &str, content: &str) {
        self.artifacts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), content.to_string());
    }
}

impl Backend for MemoryBackend {
    fn location(&self, key: &str) -> Location {
        Location::Memory(key.to_string())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn atomic_replace(&self, key: &str, content: &str) -> Result<Location, StoreError> {
        self.insert_raw(key, content);
        Ok(self.location(key))
    }

    fn lock(&self, key: &str) -> KeyLock {
        self.locks.get(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .artifacts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}
