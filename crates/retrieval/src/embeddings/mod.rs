//! Embedding collaborators.
//!
//! The retrieval service only sees the [`EmbeddingProvider`] trait; the
//! concrete provider is chosen from configuration by [`create_provider`].

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
