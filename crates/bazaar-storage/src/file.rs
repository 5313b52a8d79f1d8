//! JSON-file storage backend.
//!
//! The whole key space lives in one JSON object. Every mutation rewrites the
//! file through a temporary sibling and a rename, so readers observe either
//! the old or the new map, never a torn write.

use crate::{KeyValueStorage, StorageResult};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

type Entries = BTreeMap<String, String>;

/// Durable key-value storage in a single JSON file.
pub struct FileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<Entries> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Entries>(&content) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Storage file is unreadable, treating it as empty"
                );
                Ok(Entries::new())
            }
        }
    }

    fn write_entries(&self, entries: &Entries) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            restrict_permissions(&file)?;
            file.write_all(serde_json::to_string_pretty(entries)?.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), keys = entries.len(), "Storage file written");
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Entries) -> T) -> StorageResult<T> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut entries = self.read_entries()?;
        let result = f(&mut entries);
        self.write_entries(&entries)?;
        Ok(result)
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

impl KeyValueStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.modify(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(self.read_entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.modify(|entries| entries.remove(key).is_some())
    }

    fn set_many(&self, new_entries: &[(&str, String)]) -> StorageResult<()> {
        self.modify(|entries| {
            for (key, value) in new_entries {
                entries.insert(key.to_string(), value.clone());
            }
        })
    }

    fn delete_many(&self, keys: &[&str]) -> StorageResult<()> {
        self.modify(|entries| {
            for key in keys {
                entries.remove(*key);
            }
        })
    }
}
