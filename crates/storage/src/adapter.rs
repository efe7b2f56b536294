use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use super::KeyValueStore;
use super::error::{DeserializeSnafu, SerializeSnafu, StorageResult};

/// Typed, failure-tolerant view over a [`KeyValueStore`].
///
/// `load`, `save` and `remove` never return errors: failures are logged and
/// reported through the default value or a `false` result so callers can keep
/// their in-memory state authoritative.
#[derive(Clone)]
pub struct PersistentStore {
    backend: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into().trim().trim_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn scoped_key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.namespace)
        }
    }

    pub fn load<T>(&self, key: &str, default: T) -> T
    where
        T: DeserializeOwned,
    {
        match self.try_load(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(error) => {
                tracing::warn!(
                    key = %self.scoped_key(key),
                    error = %error,
                    "failed to load persisted value, using default"
                );
                default
            }
        }
    }

    pub fn try_load<T>(&self, key: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let scoped_key = self.scoped_key(key);
        let Some(raw) = self.backend.get(&scoped_key)? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .context(DeserializeSnafu {
                stage: "persistent-store-deserialize",
                key: scoped_key,
            })
    }

    pub fn save<T>(&self, key: &str, value: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match self.try_save(key, value) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    key = %self.scoped_key(key),
                    error = %error,
                    "failed to persist value"
                );
                false
            }
        }
    }

    pub fn try_save<T>(&self, key: &str, value: &T) -> StorageResult<()>
    where
        T: Serialize + ?Sized,
    {
        let scoped_key = self.scoped_key(key);
        let serialized = serde_json::to_string(value).context(SerializeSnafu {
            stage: "persistent-store-serialize",
            key: scoped_key.clone(),
        })?;
        self.backend.set(&scoped_key, &serialized)
    }

    pub fn remove(&self, key: &str) -> bool {
        let scoped_key = self.scoped_key(key);
        match self.backend.remove(&scoped_key) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(key = %scoped_key, error = %error, "failed to remove persisted value");
                false
            }
        }
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PersistentStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{MemoryStore, UnavailableStore};

    #[test]
    fn namespace_is_prefixed_once() {
        let store = PersistentStore::new(Arc::new(MemoryStore::new()), "/hiwar/");
        assert_eq!(store.scoped_key("conversations"), "hiwar/conversations");

        let bare = PersistentStore::new(Arc::new(MemoryStore::new()), "");
        assert_eq!(bare.scoped_key("conversations"), "conversations");
    }

    #[test]
    fn save_then_load_returns_value() {
        let backend = Arc::new(MemoryStore::new());
        let store = PersistentStore::new(backend.clone(), "hiwar");
        let value = BTreeMap::from([("a".to_string(), 1_u32), ("b".to_string(), 2)]);

        assert!(store.save("map", &value));
        assert_eq!(store.load("map", BTreeMap::new()), value);
        assert!(backend.get("hiwar/map").expect("read").is_some());
    }

    #[test]
    fn corrupt_blob_falls_back_to_default() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("hiwar/list", "{not json").expect("seed corrupt value");
        let store = PersistentStore::new(backend, "hiwar");

        assert_eq!(store.load("list", vec![7_u8]), vec![7_u8]);
        assert!(store.try_load::<Vec<u8>>("list").is_err());
    }

    #[test]
    fn unavailable_backend_never_raises() {
        let store = PersistentStore::new(Arc::new(UnavailableStore), "hiwar");
        assert_eq!(store.load("list", Vec::<u8>::new()), Vec::<u8>::new());
        assert!(!store.save("list", &[1_u8, 2]));
        assert!(!store.remove("list"));
    }

    #[test]
    fn quota_failure_reports_false_and_keeps_old_blob() {
        let backend = Arc::new(MemoryStore::with_quota(32));
        let store = PersistentStore::new(backend, "");

        assert!(store.save("k", &"short"));
        assert!(!store.save("k", &"x".repeat(64)));
        assert_eq!(store.load("k", String::new()), "short");
    }

    #[test]
    fn remove_clears_only_the_named_key() {
        let store = PersistentStore::new(Arc::new(MemoryStore::new()), "ns");
        assert!(store.save("a", &1_u8));
        assert!(store.save("b", &2_u8));

        assert!(store.remove("a"));
        assert_eq!(store.load("a", 0_u8), 0);
        assert_eq!(store.load("b", 0_u8), 2);
    }
}
