use chrono::{DateTime, Duration, Utc};

use super::ids::{ConversationId, IdGenerator, MessageId};
use super::message::{Conversation, ConversationPatch, Message, Role};
use super::search::{filter_and_sort, sort_by_recency};
use super::text::{
    DEFAULT_CONVERSATION_TITLE, TITLE_MAX_CHARS, conversation_preview, title_from_content,
};

/// In-memory conversation collection plus the current selection.
///
/// Conversations are kept in insertion order with new ones at the front;
/// display order is derived by [`ConversationStore::list`]. Operations naming
/// an unknown id are no-ops that return `false`.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    current: Option<ConversationId>,
    ids: IdGenerator,
    default_title: String,
    title_max_chars: usize,
    last_tick: Option<DateTime<Utc>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONVERSATION_TITLE, TITLE_MAX_CHARS)
    }
}

impl ConversationStore {
    pub fn new(default_title: impl Into<String>, title_max_chars: usize) -> Self {
        Self {
            conversations: Vec::new(),
            current: None,
            ids: IdGenerator::new(),
            default_title: default_title.into(),
            title_max_chars,
            last_tick: None,
        }
    }

    /// Rebuilds a store from persisted state.
    ///
    /// Duplicate ids keep their first occurrence. A selection naming a missing
    /// conversation is dropped; with no stored selection the most recently
    /// updated conversation becomes current.
    pub fn with_snapshot(
        mut self,
        conversations: Vec<Conversation>,
        selection: Option<ConversationId>,
    ) -> Self {
        for conversation in conversations {
            if self.contains(&conversation.id) {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    "skipping duplicate conversation in snapshot"
                );
                continue;
            }
            self.ids.observe(conversation.id.as_str());
            for message in &conversation.messages {
                self.ids.observe(message.id.as_str());
            }
            self.last_tick = self.last_tick.max(Some(conversation.updated_at));
            self.conversations.push(conversation);
        }

        self.current = match selection {
            Some(id) if self.contains(&id) => Some(id),
            Some(id) => {
                tracing::debug!(conversation_id = %id, "dropping dangling selection");
                None
            }
            None => self.list().first().map(|conversation| conversation.id.clone()),
        };
        self
    }

    pub fn default_title(&self) -> &str {
        &self.default_title
    }

    pub fn title_max_chars(&self) -> usize {
        self.title_max_chars
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == *id)
    }

    pub fn current_id(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current.as_ref().and_then(|id| self.get(id))
    }

    /// Conversations in storage order, newest insertions first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Conversations ordered for display: most recently updated first.
    pub fn list(&self) -> Vec<Conversation> {
        let mut listed = self.conversations.clone();
        sort_by_recency(&mut listed);
        listed
    }

    pub fn filtered(&self, term: &str) -> Vec<Conversation> {
        filter_and_sort(&self.conversations, term)
    }

    pub fn next_message_id(&mut self) -> MessageId {
        self.ids.next_message_id()
    }

    /// Timestamps handed out by the store strictly increase, so recency order
    /// never depends on clock resolution.
    pub fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_tick {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_tick = Some(now);
        now
    }

    pub fn create_conversation(&mut self, title: Option<&str>) -> ConversationId {
        let id = self.ids.next_conversation_id();
        let title = title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(self.default_title.as_str())
            .to_string();
        let now = self.now();

        self.conversations
            .insert(0, Conversation::new(id.clone(), title, now));
        self.current = Some(id.clone());
        tracing::debug!(conversation_id = %id, "conversation created");
        id
    }

    pub fn select_conversation(&mut self, id: &ConversationId) -> bool {
        if !self.contains(id) {
            tracing::debug!(conversation_id = %id, "select ignored for unknown conversation");
            return false;
        }
        self.current = Some(id.clone());
        true
    }

    pub fn clear_selection(&mut self) {
        self.current = None;
    }

    /// Idempotent; clears the selection when it pointed at `id`.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> bool {
        let before = self.conversations.len();
        self.conversations
            .retain(|conversation| conversation.id != *id);
        let removed = self.conversations.len() != before;

        if self.current.as_ref() == Some(id) {
            self.current = None;
        }
        removed
    }

    pub fn update_conversation(&mut self, id: &ConversationId, patch: ConversationPatch) -> bool {
        let now = self.now();
        let Some(conversation) = self.get_mut(id) else {
            return false;
        };
        patch.apply_to(conversation);
        conversation.touch(now);
        true
    }

    pub fn rename_conversation(&mut self, id: &ConversationId, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        self.update_conversation(id, ConversationPatch::title(title))
    }

    /// Appends `message` and refreshes the derived fields. A conversation still
    /// carrying the default title takes its title from the first user message.
    pub fn append_message(&mut self, id: &ConversationId, message: Message) -> bool {
        let now = self.now();
        let default_title = self.default_title.clone();
        let title_max_chars = self.title_max_chars;
        let Some(conversation) = self.get_mut(id) else {
            tracing::warn!(
                conversation_id = %id,
                message_id = %message.id,
                "dropping message for missing conversation"
            );
            return false;
        };

        if message.role == Role::User
            && conversation.title == default_title
            && !conversation.has_user_message()
        {
            conversation.title = title_from_content(&message.content, title_max_chars);
        }

        let reply_model = (message.role == Role::Assistant)
            .then(|| message.metadata.as_ref().and_then(|metadata| metadata.model.clone()))
            .flatten();

        conversation.messages.push(message);
        conversation.preview = Some(conversation_preview(&conversation.messages));
        if conversation.metadata.is_some() || reply_model.is_some() {
            conversation.refresh_metadata();
        }
        if let (Some(model), Some(metadata)) = (reply_model, conversation.metadata.as_mut()) {
            metadata.model = Some(model);
        }
        conversation.touch(now);
        true
    }

    pub fn delete_message(&mut self, id: &ConversationId, message_id: &MessageId) -> bool {
        let now = self.now();
        let Some(conversation) = self.get_mut(id) else {
            return false;
        };

        let before = conversation.messages.len();
        conversation
            .messages
            .retain(|message| message.id != *message_id);
        if conversation.messages.len() == before {
            return false;
        }

        conversation.preview =
            (!conversation.messages.is_empty()).then(|| conversation_preview(&conversation.messages));
        if conversation.metadata.is_some() {
            conversation.refresh_metadata();
        }
        conversation.touch(now);
        true
    }

    pub fn clear_messages(&mut self, id: &ConversationId) -> bool {
        let now = self.now();
        let Some(conversation) = self.get_mut(id) else {
            return false;
        };

        conversation.messages.clear();
        conversation.preview = None;
        if conversation.metadata.is_some() {
            conversation.refresh_metadata();
        }
        conversation.touch(now);
        true
    }

    fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == *id)
    }
}
