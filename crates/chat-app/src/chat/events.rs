use super::ids::{ConversationId, MessageId, SendAttemptId};

/// How one send attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The reply resolved. `assistant_message_id` is `None` when the target
    /// conversation was deleted while the reply was pending.
    Completed {
        conversation_id: ConversationId,
        assistant_message_id: Option<MessageId>,
    },
    /// The provider failed; the user message stays in the conversation.
    Failed {
        conversation_id: ConversationId,
        error: String,
    },
    Aborted {
        conversation_id: ConversationId,
    },
}

impl SendOutcome {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Completed {
                conversation_id, ..
            }
            | Self::Failed {
                conversation_id, ..
            }
            | Self::Aborted { conversation_id } => conversation_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Notifications broadcast by the chat session after each state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConversationCreated {
        conversation_id: ConversationId,
    },
    /// `None` when the selection was cleared.
    ConversationSelected {
        conversation_id: Option<ConversationId>,
    },
    ConversationDeleted {
        conversation_id: ConversationId,
    },
    ConversationUpdated {
        conversation_id: ConversationId,
    },
    MessageAppended {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    SendStarted {
        conversation_id: ConversationId,
        attempt: SendAttemptId,
    },
    SendFinished {
        attempt: SendAttemptId,
        outcome: SendOutcome,
    },
}
