use futures::future::BoxFuture;
use snafu::Snafu;
use tokio_util::sync::CancellationToken;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub response_delay_ms: u64,
    pub model: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider_id: impl Into<String>, response_delay_ms: u64) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            response_delay_ms,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into().trim().to_string();
        self.model = (!model.is_empty()).then_some(model);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: ProviderRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One prompt plus the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub prompt: String,
    pub conversation_id: Option<String>,
    pub history: Vec<ProviderMessage>,
}

impl ProviderRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            conversation_id: None,
            history: Vec::new(),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ProviderMessage>) -> Self {
        self.history = history;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub content: String,
    pub model: Option<String>,
    pub tokens: Option<u64>,
}

impl ProviderReply {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: None,
            tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("request was aborted"))]
    Cancelled { stage: &'static str },
    #[snafu(display("prompt is empty"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("response template pattern '{pattern}' is invalid"))]
    InvalidTemplate {
        stage: &'static str,
        pattern: String,
        source: regex::Error,
    },
    #[snafu(display("response provider is unavailable: {details}"))]
    Unavailable {
        stage: &'static str,
        details: String,
    },
}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn unavailable(stage: &'static str, details: impl Into<String>) -> Self {
        Self::Unavailable {
            stage,
            details: details.into(),
        }
    }
}

/// Turns a prompt into reply text: one request, one reply or failure.
///
/// Implementations should stop early once `cancel` fires; callers also race the
/// returned future against the token, so honouring it is an optimisation.
pub trait ResponseProvider: Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> &str;
    fn respond<'a>(
        &'a self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply>>;
}
