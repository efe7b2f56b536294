use std::fmt;

use serde::{Deserialize, Serialize};

const ID_PREFIX: &str = "id-";

macro_rules! define_chat_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

define_chat_id!(ConversationId);
define_chat_id!(MessageId);

/// Key for one send attempt; changes on every send/retry so stale resolutions can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendAttemptId(pub u64);

impl SendAttemptId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Counter-based id source shared by conversations and messages.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> String {
        let id = format!("{ID_PREFIX}{}", self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    pub fn next_conversation_id(&mut self) -> ConversationId {
        ConversationId(self.next())
    }

    pub fn next_message_id(&mut self) -> MessageId {
        MessageId(self.next())
    }

    /// Moves the counter past `raw` when it is one of our `id-N` values.
    ///
    /// Ids restored from persistence go through here so freshly generated ids
    /// cannot collide with them.
    pub fn observe(&mut self, raw: &str) {
        let Some(counter) = raw
            .strip_prefix(ID_PREFIX)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        else {
            return;
        };

        if counter >= self.next {
            self.next = counter.saturating_add(1);
        }
    }
}
