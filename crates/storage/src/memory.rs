use std::collections::HashMap;

use parking_lot::Mutex;
use snafu::ensure;

use super::KeyValueStore;
use super::error::{QuotaExceededSnafu, StorageResult, UnavailableSnafu};

/// Process-local store, optionally bounded by a byte quota over keys and values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn used_bytes_without(entries: &HashMap<String, String>, skip_key: &str) -> usize {
        entries
            .iter()
            .filter(|(key, _)| key.as_str() != skip_key)
            .map(|(key, value)| key.len() + value.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.lock();

        if let Some(quota) = self.quota_bytes {
            let required = Self::used_bytes_without(&entries, key) + key.len() + value.len();
            ensure!(
                required <= quota,
                QuotaExceededSnafu {
                    stage: "memory-store-set",
                    key: key.to_string(),
                    required,
                    quota,
                }
            );
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Store used where no persistent storage exists; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        UnavailableSnafu {
            stage: "unavailable-store-get",
            details: "no persistent store is configured".to_string(),
        }
        .fail()
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        UnavailableSnafu {
            stage: "unavailable-store-set",
            details: "no persistent store is configured".to_string(),
        }
        .fail()
    }

    fn remove(&self, _key: &str) -> StorageResult<()> {
        UnavailableSnafu {
            stage: "unavailable-store-remove",
            details: "no persistent store is configured".to_string(),
        }
        .fail()
    }
}
