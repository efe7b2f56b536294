#![deny(unsafe_code)]

/// Bootstrap, tracing setup and the terminal front end.
pub mod app;
/// Conversation state, the send pipeline and their domain types.
pub mod chat;
/// Snapshot persistence over the key-value backends.
pub mod database;
pub mod debounce;
/// Layered settings persistence.
pub mod settings;

pub use app::{AppError, AppResult, bootstrap, init_tracing, run};
pub use chat::{ChatError, ChatSession, SessionConfig};
pub use settings::{ChatSettings, SettingsStore};
