/// Event contracts broadcast by the chat session.
pub mod events;
pub mod ids;
/// Domain entities: messages, conversations and partial updates.
pub mod message;
pub mod search;
/// Deterministic send lifecycle boundaries.
pub mod send_state;
pub mod session;
pub mod store;
pub mod text;

pub use events::{SendOutcome, SessionEvent};
pub use ids::{ConversationId, IdGenerator, MessageId, SendAttemptId};
pub use message::{
    Conversation, ConversationMetadata, ConversationPatch, Message, MessageMetadata, MessageType,
    Role,
};
pub use search::{SearchHit, filter_and_sort, search_conversations, search_in_conversation};
pub use send_state::{
    SendState, SendTarget, SendTransition, SendTransitionRejection, SendTransitionResult,
};
pub use session::{ChatError, ChatResult, ChatSession, SessionConfig, SessionSnapshot};
pub use store::ConversationStore;
pub use text::{
    DEFAULT_CONVERSATION_TITLE, conversation_preview, detect_code, detect_list,
    extract_code_language, reading_time_minutes, title_from_content, truncate_text,
};
