use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, MessageId};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Display hint for a message body. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Code,
    List,
    Image,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One chat turn. Content is immutable once the message joins a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            timestamp,
            message_type: MessageType::Text,
            metadata: None,
        }
    }

    pub fn user(id: MessageId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(id, Role::User, content, timestamp)
    }

    pub fn assistant(id: MessageId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(id, Role::Assistant, content, timestamp)
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn tokens(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|metadata| metadata.tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
}

/// Conversation aggregate root. Messages are kept in chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConversationMetadata>,
}

impl Conversation {
    /// Creates an empty conversation; both timestamps start at `now`.
    pub fn new(id: ConversationId, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            preview: None,
            category: None,
            tags: Vec::new(),
            metadata: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|message| message.role == Role::User)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Recomputes the derived counters kept in `metadata`.
    pub fn refresh_metadata(&mut self) {
        let total_tokens = self
            .messages
            .iter()
            .filter_map(Message::tokens)
            .sum::<u64>();
        let message_count = self.messages.len();

        let metadata = self.metadata.get_or_insert_with(ConversationMetadata::default);
        metadata.message_count = Some(message_count);
        metadata.total_tokens = (total_tokens > 0).then_some(total_tokens);
    }
}

/// Partial update merged by `update_conversation`. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
    pub metadata: Option<ConversationMetadata>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tags.is_none()
            && self.category.is_none()
            && self.metadata.is_none()
    }

    pub(crate) fn apply_to(self, conversation: &mut Conversation) {
        if let Some(title) = self.title {
            conversation.title = title;
        }
        if let Some(tags) = self.tags {
            conversation.tags = tags;
        }
        if let Some(category) = self.category {
            conversation.category = Some(category);
        }
        if let Some(metadata) = self.metadata {
            conversation.metadata = Some(metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn json_shape_uses_camel_case_and_type_key() {
        let mut conversation = Conversation::new(ConversationId::new("id-1"), "عنوان", at(0));
        conversation.messages.push(
            Message::assistant(MessageId::new("id-2"), "```rs\nfn main() {}\n```", at(1))
                .with_type(MessageType::Code),
        );

        let value = serde_json::to_value(&conversation).expect("serialize");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert_eq!(value["messages"][0]["type"], "code");
        assert_eq!(value["messages"][0]["role"], "assistant");
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn minimal_message_json_defaults_to_text() {
        let message: Message = serde_json::from_str(
            r#"{"id":"msg-1","role":"user","content":"hi","timestamp":"2024-01-15T14:40:00Z"}"#,
        )
        .expect("deserialize");
        assert_eq!(message.message_type, MessageType::Text);
        assert_eq!(message.metadata, None);
        assert_eq!(message.timestamp, at(40));
    }

    #[test]
    fn refresh_metadata_counts_messages_and_tokens() {
        let mut conversation = Conversation::new(ConversationId::new("id-1"), "t", at(0));
        conversation
            .messages
            .push(Message::user(MessageId::new("id-2"), "q", at(1)));
        conversation.messages.push(
            Message::assistant(MessageId::new("id-3"), "a b c", at(2)).with_metadata(
                MessageMetadata {
                    tokens: Some(3),
                    ..MessageMetadata::default()
                },
            ),
        );

        conversation.refresh_metadata();
        let metadata = conversation.metadata.expect("metadata");
        assert_eq!(metadata.message_count, Some(2));
        assert_eq!(metadata.total_tokens, Some(3));
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut conversation = Conversation::new(ConversationId::new("id-1"), "old", at(0));
        conversation.category = Some("تطوير".to_string());

        ConversationPatch::default()
            .with_tags(vec!["Rust".to_string()])
            .apply_to(&mut conversation);

        assert_eq!(conversation.title, "old");
        assert_eq!(conversation.tags, vec!["Rust".to_string()]);
        assert_eq!(conversation.category.as_deref(), Some("تطوير"));
    }
}
