//! Collaborator abstraction used by the fan-out coordinator.

use brief_core::AppResult;
use serde_json::Value;

/// A downstream dependency that answers one subtask.
///
/// Implementations own any retry policy; the coordinator calls them once.
#[async_trait::async_trait]
pub trait Collaborator: Send + Sync {
    async fn call(&self, query: &str, input: Value) -> AppResult<Value>;
}
