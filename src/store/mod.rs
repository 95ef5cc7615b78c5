// src/store/mod.rs
pub mod fs;
pub mod lock;
pub mod memory;

use serde::{Serialize, Serializer};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, PoisonError},
};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::process::{parse_dataset, parse_header, render_table};
use crate::schema::{added_columns, merge, Table};

pub use fs::FsBackend;
pub use lock::{KeyLock, LockRegistry};
pub use memory::MemoryBackend;

/// Where a dataset lives. Always a deterministic function of its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    File(PathBuf),
    Memory(String),
}

impl Location {
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Location::File(p) => Some(p),
            Location::Memory(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::File(p) => write!(f, "{}", p.display()),
            Location::Memory(key) => write!(f, "memory://{}", key),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Storage capability behind a [`DatasetStore`]: one text artifact per key.
///
/// Implementations must make `atomic_replace` all-or-nothing from a reader's
/// point of view, and must hand out the same lock for the same key.
pub trait Backend: Send + Sync {
    fn location(&self, key: &str) -> Location;

    /// Current artifact content, `None` when the key has never been written.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn atomic_replace(&self, key: &str, content: &str) -> Result<Location, StoreError>;

    fn lock(&self, key: &str) -> KeyLock;

    /// Keys with a persisted artifact, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Result of a write that actually touched storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub location: Location,
    pub rows_appended: usize,
    pub total_rows: usize,
    /// Columns this write introduced (all of them for a fresh dataset).
    pub added_columns: Vec<String>,
}

/// One table per storage key, merged on every write.
#[derive(Clone)]
pub struct DatasetStore {
    backend: Arc<dyn Backend>,
}

impl DatasetStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Store backed by `<dir>/<key>.csv` files; creates `dir` if needed.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(FsBackend::new(dir)?)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn location(&self, key: &str) -> Location {
        self.backend.location(key)
    }

    /// Merge `incoming` into the dataset for `key` and persist the result.
    ///
    /// A table without rows writes nothing and returns `Ok(None)`. An existing
    /// artifact that cannot be parsed is reported as [`StoreError::Corrupt`]
    /// and left as it is. Load, merge and replace run under the key's lock,
    /// so concurrent writers of one key never lose each other's rows.
    #[tracing::instrument(level = "debug", skip(self, incoming), fields(incoming_rows = incoming.num_rows()))]
    pub fn write(&self, key: &str, incoming: Table) -> Result<Option<Commit>, StoreError> {
        if incoming.is_empty() {
            debug!("incoming table has no rows; nothing to write");
            return Ok(None);
        }

        let lock = self.backend.lock(key);
        // a panic inside another writer cannot have left a partial artifact
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.load(key)?;
        let before = existing
            .as_ref()
            .map(|t| t.columns.clone())
            .unwrap_or_default();
        let rows_appended = incoming.num_rows();

        let merged = merge(existing, incoming);
        let added = added_columns(&before, &merged);
        let content = render_table(&merged).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        let location = self.backend.atomic_replace(key, &content)?;

        info!(
            key = %key,
            location = %location,
            rows_appended,
            total_rows = merged.num_rows(),
            added_columns = ?added,
            "dataset updated"
        );

        Ok(Some(Commit {
            location,
            rows_appended,
            total_rows: merged.num_rows(),
            added_columns: added,
        }))
    }

    /// Whole dataset for `key`, if one exists.
    pub fn load(&self, key: &str) -> Result<Option<Table>, StoreError> {
        let Some(content) = self.backend.load(key)? else {
            return Ok(None);
        };
        parse_dataset(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                location: self.backend.location(key),
                source,
            })
    }

    /// Column names of the dataset for `key`, if one exists. Used as a hint
    /// for producers so they reuse existing columns.
    pub fn header(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        let Some(content) = self.backend.load(key)? else {
            return Ok(None);
        };
        parse_header(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                location: self.backend.location(key),
                source,
            })
    }

    /// Every persisted key with its location.
    pub fn list(&self) -> Result<Vec<(String, Location)>, StoreError> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .map(|k| {
                let loc = self.backend.location(&k);
                (k, loc)
            })
            .collect())
    }
}
