//! Builds the configured language-model client.

use crate::client::LlmClient;
use crate::providers::OllamaClient;
use brief_core::config::LlmSettings;
use brief_core::{AppError, AppResult};
use std::sync::Arc;

/// Create the client named by `settings.provider`.
///
/// Returns `AppError::Config` for an unknown provider.
pub fn create_client(settings: &LlmSettings) -> AppResult<Arc<dyn LlmClient>> {
    match settings.provider.to_lowercase().as_str() {
        "ollama" => {
            let client = OllamaClient::new(settings.endpoint.as_deref())?;
            tracing::debug!("Created Ollama client at {}", client.base_url());
            Ok(Arc::new(client))
        }
        other => Err(AppError::Config(format!("Unknown LLM provider: {}", other))),
    }
}
