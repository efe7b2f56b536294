pub mod conversation;

pub use conversation::{ConversationRepository, StoredSnapshot, open_backend};
