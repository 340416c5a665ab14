//! Ollama embedding provider.
//!
//! Calls the local `/api/embeddings` endpoint. Network errors, 5xx and 429
//! responses are retried up to `max_retries` times after the first attempt,
//! with exponential backoff. Other failures are returned at once. The
//! returned dimension is checked against the configured one so a wrong model
//! never reaches the index.

use crate::embeddings::provider::EmbeddingProvider;
use async_trait::async_trait;
use brief_core::config::EmbeddingConfig;
use brief_core::{AppError, AppResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const EMBEDDING_ENDPOINT: &str = "/api/embeddings";

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 100;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    error: String,
}

struct EmbedFailure {
    error: AppError,
    retryable: bool,
}

impl EmbedFailure {
    fn fatal(error: AppError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

impl OllamaProvider {
    /// Create a provider from configuration.
    ///
    /// No request is made here; an unreachable server surfaces on the first
    /// embed call.
    pub fn new(config: &EmbeddingConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                AppError::Embedding(format!("Failed to create HTTP client for Ollama: {}", e))
            })?;

        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries,
        })
    }

    #[instrument(skip(self, text), fields(text_len = text.len(), model = %self.model))]
    async fn embed_with_retries(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut attempt = 0;
        loop {
            match self.embed_single(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                    warn!(
                        "Embedding failed (attempt {}/{}), retrying in {}ms: {}",
                        attempt,
                        self.max_retries + 1,
                        backoff_ms,
                        failure.error
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, EmbedFailure> {
        let url = format!("{}{}", self.base_url, EMBEDDING_ENDPOINT);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        debug!("Sending embedding request to {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedFailure {
                error: AppError::Embedding(format!("Failed to send request to Ollama: {}", e)),
                retryable: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|r| r.error)
                .unwrap_or(error_text);

            return Err(EmbedFailure {
                error: AppError::Embedding(format!("Ollama API error ({}): {}", status, message)),
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            EmbedFailure::fatal(AppError::Embedding(format!(
                "Failed to parse Ollama response: {}",
                e
            )))
        })?;

        // A wrong dimension will not fix itself
        self.check_dimensions(body.embedding)
            .map_err(EmbedFailure::fatal)
    }

    fn check_dimensions(&self, embedding: Vec<f32>) -> AppResult<Vec<f32>> {
        if embedding.len() != self.dimensions {
            return Err(AppError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(AppError::Embedding("Cannot embed empty text".to_string()));
        }

        self.embed_with_retries(text).await
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), model = %self.model))]
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        // The embeddings endpoint takes one prompt per request
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }
}
