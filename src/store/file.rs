//! File-backed settings store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::{StoreError, StoreResult};
use super::SettingsStore;

/// Stores each key as its own file inside a directory.
///
/// Keys may only contain ASCII alphanumerics, `.`, `-` and `_`, and may not
/// start with a dot, so a key can never escape the directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    /// Opens a store in the given directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(directory: impl AsRef<Path>) -> StoreResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            StoreError::Storage(format!(
                "Failed to create settings directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.directory.join(format!("{key}.json")))
    }
}

impl SettingsStore for JsonFileStore {
    fn store(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.path_for(key)?;
        // Write-then-rename so a crash never leaves a half-written value.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)
            .and_then(|()| fs::rename(&staging, &path))
            .map_err(|e| StoreError::Storage(format!("Failed to write {key}: {e}")))
    }

    fn retrieve(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Storage(format!("Failed to read {key}: {e}"))),
        }
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Storage(format!("Failed to delete {key}: {e}"))),
        }
    }
}
