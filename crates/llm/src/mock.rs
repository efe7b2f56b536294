use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;

use super::provider::{
    CancelledSnafu, EmptyPromptSnafu, InvalidTemplateSnafu, ProviderReply, ProviderRequest,
    ProviderResult, ResponseProvider,
};

pub const MOCK_PROVIDER_ID: &str = "mock";
pub const MOCK_MODEL: &str = "mock-assistant";
pub const DEFAULT_RESPONSE_DELAY: Duration = Duration::from_millis(2_000);

const PROMPT_PLACEHOLDER: &str = "{prompt}";

pub const DEFAULT_TEMPLATE: &str =
    "شكراً لسؤالك: \"{prompt}\". هذا مثال على رد ذكي من الـ AI.";

/// Pattern and template pairs checked in order before falling back to
/// [`DEFAULT_TEMPLATE`].
pub const BUILTIN_RULES: &[(&str, &str)] = &[
    (
        r"(?i)^\s*(hello|hi|hey|مرحبا|مرحباً|أهلا|أهلاً|السلام عليكم)\b",
        "أهلاً بك! كيف يمكنني مساعدتك اليوم؟",
    ),
    (
        r"(?i)(```|\bcode\b|\bfunction\b|كود|برمجة|دالة)",
        "هذا رد تجريبي من المساعد الذكي حول \"{prompt}\":\n\n```javascript\nconsole.log('مرحباً');\n```",
    ),
    (
        r"[?؟]\s*$",
        "بناءً على سؤالك حول \"{prompt}\", إليك بعض المعلومات المفيدة...",
    ),
];

#[derive(Debug, Clone)]
pub struct TemplateRule {
    pattern: Regex,
    template: String,
}

impl TemplateRule {
    pub fn new(pattern: &str, template: impl Into<String>) -> ProviderResult<Self> {
        let pattern = Regex::new(pattern).context(InvalidTemplateSnafu {
            stage: "compile-template-rule",
            pattern: pattern.to_string(),
        })?;

        Ok(Self {
            pattern,
            template: template.into(),
        })
    }

    pub fn matches(&self, prompt: &str) -> bool {
        self.pattern.is_match(prompt)
    }
}

/// Canned responder standing in for a network-bound model.
#[derive(Debug, Clone)]
pub struct MockResponseProvider {
    delay: Duration,
    model: String,
    rules: Vec<TemplateRule>,
    default_template: String,
}

impl MockResponseProvider {
    pub fn new(delay: Duration) -> ProviderResult<Self> {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(pattern, template)| TemplateRule::new(pattern, *template))
            .collect::<ProviderResult<Vec<_>>>()?;

        Ok(Self {
            delay,
            model: MOCK_MODEL.to_string(),
            rules,
            default_template: DEFAULT_TEMPLATE.to_string(),
        })
    }

    /// A provider that always answers with `template`, ignoring the built-in rules.
    pub fn fixed(delay: Duration, template: impl Into<String>) -> Self {
        Self {
            delay,
            model: MOCK_MODEL.to_string(),
            rules: Vec::new(),
            default_template: template.into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_rule(mut self, rule: TemplateRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn render(&self, prompt: &str) -> String {
        let template = self
            .rules
            .iter()
            .find(|rule| rule.matches(prompt))
            .map_or(self.default_template.as_str(), |rule| rule.template.as_str());

        template.replace(PROMPT_PLACEHOLDER, prompt)
    }
}

impl ResponseProvider for MockResponseProvider {
    fn id(&self) -> &str {
        MOCK_PROVIDER_ID
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn respond<'a>(
        &'a self,
        request: ProviderRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, ProviderResult<ProviderReply>> {
        async move {
            let prompt = request.prompt.trim();
            ensure!(
                !prompt.is_empty(),
                EmptyPromptSnafu {
                    stage: "mock-respond-validate"
                }
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    return CancelledSnafu { stage: "mock-respond-delay" }.fail();
                }
                _ = tokio::time::sleep(self.delay) => {}
            }

            let content = self.render(prompt);
            let tokens = content.split_whitespace().count() as u64;
            tracing::debug!(
                conversation_id = ?request.conversation_id,
                history_len = request.history.len(),
                tokens,
                "mock provider produced reply"
            );

            Ok(ProviderReply::new(content)
                .with_model(self.model.clone())
                .with_tokens(tokens))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MockResponseProvider {
        MockResponseProvider::new(Duration::ZERO).expect("builtin rules compile")
    }

    #[test]
    fn greeting_prompt_selects_greeting_template() {
        assert_eq!(provider().render("مرحبا"), "أهلاً بك! كيف يمكنني مساعدتك اليوم؟");
        assert_eq!(provider().render("Hello there"), "أهلاً بك! كيف يمكنني مساعدتك اليوم؟");
    }

    #[test]
    fn question_prompt_embeds_prompt_text() {
        let reply = provider().render("ما هو Rust؟");
        assert!(reply.starts_with("بناءً على سؤالك حول \"ما هو Rust؟\""));
    }

    #[test]
    fn unmatched_prompt_uses_default_template() {
        assert_eq!(
            provider().render("شكراً"),
            "شكراً لسؤالك: \"شكراً\". هذا مثال على رد ذكي من الـ AI."
        );
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let error = TemplateRule::new("(unclosed", "x").expect_err("bad regex");
        assert!(error.to_string().contains("(unclosed"));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_arrives_after_delay_with_metadata() {
        let provider = MockResponseProvider::fixed(DEFAULT_RESPONSE_DELAY, "رد {prompt}");
        let started = tokio::time::Instant::now();

        let reply = provider
            .respond(ProviderRequest::new("hello"), CancellationToken::new())
            .await
            .expect("reply");

        assert!(started.elapsed() >= DEFAULT_RESPONSE_DELAY);
        assert_eq!(reply.content, "رد hello");
        assert_eq!(reply.model.as_deref(), Some(MOCK_MODEL));
        assert_eq!(reply.tokens, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_delay() {
        let provider = provider();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = provider
            .respond(ProviderRequest::new("hello"), cancel)
            .await
            .expect_err("cancelled");
        assert!(error.is_cancelled());
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected() {
        let error = provider()
            .respond(ProviderRequest::new("   "), CancellationToken::new())
            .await
            .expect_err("empty prompt");
        assert!(matches!(error, crate::ProviderError::EmptyPrompt { .. }));
    }
}
