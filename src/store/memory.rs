//! In-memory settings store for tests.

use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::SettingsStore;

/// In-memory store implementation.
///
/// Nothing survives the process. Only use this in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn store(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn retrieve(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let data = self
            .data
            .read()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        data.remove(key);
        Ok(())
    }
}
