//! LLM provider implementations for Mentor.
//!
//! The OpenAI-compatible provider covers DeepSeek and OpenAI; the mock
//! provider replays scripted turns for tests and keyless dev runs.

pub mod mock;
pub mod openai_compat;

pub use mock::MockProvider;
pub use openai_compat::OpenAiCompatProvider;

use mentor_config::ProviderConfig;
use mentor_core::error::ProviderError;
use mentor_core::Provider;
use std::sync::Arc;

/// Build a provider from configuration.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    match config.kind.as_str() {
        "mock" => Ok(Arc::new(MockProvider::new())),
        "deepseek" | "openai" => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "provider '{}' requires an API key (set MENTOR_API_KEY)",
                    config.kind
                ))
            })?;
            Ok(Arc::new(OpenAiCompatProvider::new(
                config.kind.clone(),
                config.api_url.clone(),
                api_key,
                config.request_timeout_secs,
            )?))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "unknown provider kind '{other}'"
        ))),
    }
}
