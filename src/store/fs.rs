use glob::{glob, Pattern};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tempfile::Builder;
use tracing::{debug, warn};

use super::{Backend, KeyLock, Location, LockRegistry};
use crate::error::StoreError;

/// Filesystem backend: one `<key>.csv` per dataset inside `dir`.
pub struct FsBackend {
    dir: PathBuf,
    locks: LockRegistry,
}

impl FsBackend {
    pub const EXTENSION: &'static str = "csv";

    /// Create the backend, creating `dir` if it does not exist yet.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Init {
            dir: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            locks: LockRegistry::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, Self::EXTENSION))
    }
}

impl Backend for FsBackend {
    fn location(&self, key: &str) -> Location {
        Location::File(self.path(key))
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                location: Location::File(path),
                source,
            }),
        }
    }

    /// Write to a temp file in the same directory, fsync it, then rename it
    /// over the final path.
    fn atomic_replace(&self, key: &str, content: &str) -> Result<Location, StoreError> {
        let path = self.path(key);
        let replace_err = |source: io::Error| StoreError::Replace {
            location: Location::File(path.clone()),
            source,
        };

        let mut tmp = Builder::new()
            .prefix(&format!(".{}.", key))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(replace_err)?;
        tmp.write_all(content.as_bytes()).map_err(replace_err)?;
        tmp.as_file().sync_all().map_err(replace_err)?;
        // on failure the temp file is removed when `e.file` drops
        tmp.persist(&path).map_err(|e| replace_err(e.error))?;

        debug!(path = %path.display(), bytes = content.len(), "replaced dataset file");
        Ok(Location::File(path))
    }

    fn lock(&self, key: &str) -> KeyLock {
        self.locks.get(key)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        // the directory itself may contain glob metacharacters
        let pattern = format!(
            "{}/*.{}",
            Pattern::escape(&self.dir.to_string_lossy()),
            Self::EXTENSION
        );
        let entries = glob(&pattern).map_err(|e| StoreError::List {
            dir: self.dir.clone(),
            reason: e.to_string(),
        })?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read dataset entry: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_key_loads_as_none() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::new(tmp.path()).unwrap();
        assert_eq!(backend.load("economy").unwrap(), None);
    }

    #[test]
    fn replace_overwrites_and_leaves_no_temp_files() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::new(tmp.path().join("datasets")).unwrap();

        let loc = backend.atomic_replace("economy", "a\n1\n").unwrap();
        assert_eq!(loc, Location::File(tmp.path().join("datasets/economy.csv")));
        backend.atomic_replace("economy", "a\n1\n2\n").unwrap();

        assert_eq!(backend.load("economy").unwrap().as_deref(), Some("a\n1\n2\n"));
        let names: Vec<String> = fs::read_dir(backend.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["economy.csv".to_string()]);
    }

    #[test]
    fn keys_lists_csv_stems_sorted() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::new(tmp.path()).unwrap();
        backend.atomic_replace("health", "a\n1\n").unwrap();
        backend.atomic_replace("economy", "a\n1\n").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["economy", "health"]);
    }

    #[test]
    fn keys_in_a_directory_with_glob_characters() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::new(tmp.path().join("runs[2024]*?")).unwrap();
        backend.atomic_replace("economy", "a\n1\n").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["economy"]);
    }

    #[test]
    fn unreadable_artifact_is_a_read_error() {
        let tmp = tempdir().unwrap();
        let backend = FsBackend::new(tmp.path()).unwrap();
        // a directory where the file should be
        fs::create_dir(tmp.path().join("economy.csv")).unwrap();

        let err = backend.load("economy").unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }
}
