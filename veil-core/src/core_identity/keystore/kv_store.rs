//! Key-value persistence used for the active identity and settings
//!
//! The web client kept both in `localStorage`; hosts here pick a backend:
//! [`MemoryStore`] for tests and ephemeral sessions, [`FileStore`] for a
//! data directory with one file per key.

use super::KeystoreError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Byte-oriented `get`/`set` store
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value for `key`, `None` when absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError>;

    /// Replace the value for `key`
    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeystoreError>;

    /// Delete `key`; absent keys are not an error
    fn remove(&self, key: &str) -> Result<(), KeystoreError>;
}

/// Helper to convert poison errors into KeystoreError
fn handle_poison<T>(_err: PoisonError<T>) -> KeystoreError {
    KeystoreError::Storage("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// In-memory store (non-persistent)
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        Ok(self.entries.read().map_err(handle_poison)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeystoreError> {
        self.entries
            .write()
            .map_err(handle_poison)?
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KeystoreError> {
        self.entries.write().map_err(handle_poison)?.remove(key);
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per entry
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `base_path`
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(FileStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Keys map straight to file names, so only a safe character set is allowed
    fn entry_path(&self, key: &str) -> Result<PathBuf, KeystoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if !valid {
            return Err(KeystoreError::Storage(format!("invalid storage key: {:?}", key)));
        }

        Ok(self.base_path.join(format!("{}.json", key)))
    }

    /// Write file atomically (write to temp, then rename)
    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), KeystoreError> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(temp_path, path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let path = self.entry_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), KeystoreError> {
        let path = self.entry_path(key)?;
        self.write_atomic(&path, value)
    }

    fn remove(&self, key: &str) -> Result<(), KeystoreError> {
        let path = self.entry_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
