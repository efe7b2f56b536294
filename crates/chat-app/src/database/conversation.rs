use std::sync::Arc;

use hiwar_storage::{
    FileStore, KeyValueStore, MemoryStore, PersistentStore, SqliteStore, StorageResult,
    UnavailableStore,
};

use crate::chat::{Conversation, ConversationId};
use crate::settings::{StorageBackend, StorageSettings};

/// Snapshot persistence for the session: the whole conversation collection
/// under one key and the current selection under another.
#[derive(Debug, Clone)]
pub struct ConversationRepository {
    store: PersistentStore,
    conversations_key: String,
    selection_key: String,
}

/// State restored on startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSnapshot {
    pub conversations: Vec<Conversation>,
    pub selection: Option<ConversationId>,
}

impl ConversationRepository {
    pub fn new(
        store: PersistentStore,
        conversations_key: impl Into<String>,
        selection_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            conversations_key: conversations_key.into(),
            selection_key: selection_key.into(),
        }
    }

    pub fn from_settings(backend: Arc<dyn KeyValueStore>, settings: &StorageSettings) -> Self {
        Self::new(
            PersistentStore::new(backend, settings.namespace.clone()),
            settings.conversations_key.clone(),
            settings.selection_key.clone(),
        )
    }

    /// Repository over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::from_settings(Arc::new(MemoryStore::new()), &StorageSettings::default())
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    /// Missing or unreadable data restores as an empty snapshot.
    pub fn load(&self) -> StoredSnapshot {
        let conversations = self
            .store
            .load::<Vec<Conversation>>(&self.conversations_key, Vec::new());
        let selection = self
            .store
            .load::<Option<ConversationId>>(&self.selection_key, None);

        tracing::debug!(
            conversations = conversations.len(),
            has_selection = selection.is_some(),
            "restored conversation snapshot"
        );
        StoredSnapshot {
            conversations,
            selection,
        }
    }

    /// Returns `false` when either write failed; the caller's state stays authoritative.
    pub fn save(&self, conversations: &[Conversation], selection: Option<&ConversationId>) -> bool {
        let saved_conversations = self.store.save(&self.conversations_key, conversations);
        let saved_selection = match selection {
            Some(selection) => self.store.save(&self.selection_key, selection),
            None => self.store.remove(&self.selection_key),
        };
        saved_conversations && saved_selection
    }

    pub fn clear(&self) -> bool {
        let removed_conversations = self.store.remove(&self.conversations_key);
        let removed_selection = self.store.remove(&self.selection_key);
        removed_conversations && removed_selection
    }
}

/// Opens the key-value backend named by `settings`.
pub async fn open_backend(settings: &StorageSettings) -> StorageResult<Arc<dyn KeyValueStore>> {
    let backend: Arc<dyn KeyValueStore> = match settings.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => Arc::new(FileStore::new(settings.resolved_location())),
        StorageBackend::Sqlite => {
            let location = settings.resolved_location();
            Arc::new(SqliteStore::open(&location.to_string_lossy()).await?)
        }
        StorageBackend::None => Arc::new(UnavailableStore),
    };

    tracing::info!(backend = ?settings.backend, "opened conversation storage");
    Ok(backend)
}
