//! Language-model client used to write the narrative brief.
//!
//! The synthesis step only needs a non-streaming completion, so the
//! abstraction is a single [`LlmClient::complete`] call. Ollama is the one
//! built-in backend; tests plug in their own [`LlmClient`].

pub mod client;
pub mod factory;
pub mod providers;

pub use client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
pub use factory::create_client;
pub use providers::OllamaClient;
