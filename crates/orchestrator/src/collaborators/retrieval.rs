//! Context retrieval from the semantic index.

use crate::collaborator::Collaborator;
use brief_core::AppResult;
use brief_retrieval::RetrievalService;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct RetrievalCollaborator {
    service: Arc<RetrievalService>,
    default_top_k: usize,
}

impl RetrievalCollaborator {
    pub fn new(service: Arc<RetrievalService>, default_top_k: usize) -> Self {
        Self {
            service,
            default_top_k,
        }
    }
}

#[async_trait::async_trait]
impl Collaborator for RetrievalCollaborator {
    /// Input `{"top_k": n}`; output `{"results": [SearchHit, ...]}`.
    async fn call(&self, query: &str, input: Value) -> AppResult<Value> {
        let top_k = input
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(self.default_top_k);

        let hits = self.service.search(query, top_k).await?;
        tracing::debug!("Retrieved {} passages", hits.len());

        Ok(json!({ "results": hits }))
    }
}
