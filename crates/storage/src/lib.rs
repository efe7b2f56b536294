pub mod adapter;
pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;

pub use adapter::PersistentStore;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::{MemoryStore, UnavailableStore};
pub use sqlite::SqliteStore;

/// Key-value byte store holding serialized snapshots.
///
/// Side effects of every call are scoped to the named key; there is no
/// transactional guarantee across keys.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Removing a key that does not exist succeeds.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

