use std::sync::Arc;
use std::time::Duration;

mod mock;
mod provider;

pub use mock::{
    BUILTIN_RULES, DEFAULT_RESPONSE_DELAY, DEFAULT_TEMPLATE, MOCK_MODEL, MOCK_PROVIDER_ID,
    MockResponseProvider, TemplateRule,
};
pub use provider::{
    ProviderConfig, ProviderError, ProviderMessage, ProviderReply, ProviderRequest,
    ProviderResult, ProviderRole, ResponseProvider,
};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn ResponseProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = MOCK_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        MOCK_PROVIDER_ID => {
            let mut provider =
                MockResponseProvider::new(Duration::from_millis(config.response_delay_ms))?;
            if let Some(model) = config.model {
                provider = provider.with_model(model);
            }
            tracing::info!(
                provider_id = MOCK_PROVIDER_ID,
                delay_ms = config.response_delay_ms,
                "created response provider"
            );
            Ok(Arc::new(provider))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
