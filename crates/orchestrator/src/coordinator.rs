//! Fan-out coordinator.
//!
//! Subtasks are looked up in a declarative [`SubtaskTable`]; each runs on its
//! own tokio task under its own timeout. A subtask that times out is aborted
//! and reported as `timeout`; one that fails or panics is reported as
//! `error`. Neither affects its siblings, and results come back in
//! submission order.

use crate::collaborator::Collaborator;
use crate::types::{FanOutRequest, FanOutResult};
use brief_core::{AppError, AppResult};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Used when neither the request nor the table names a timeout.
pub const DEFAULT_SUBTASK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SubtaskEntry {
    pub collaborator: Arc<dyn Collaborator>,
    pub timeout: Duration,
}

/// Name → collaborator and default timeout.
#[derive(Clone, Default)]
pub struct SubtaskTable {
    entries: BTreeMap<String, SubtaskEntry>,
}

impl SubtaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn register(
        mut self,
        name: impl Into<String>,
        collaborator: Arc<dyn Collaborator>,
        timeout: Duration,
    ) -> Self {
        self.entries.insert(
            name.into(),
            SubtaskEntry {
                collaborator,
                timeout,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&SubtaskEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Coordinator {
    table: SubtaskTable,
}

impl Coordinator {
    pub fn new(table: SubtaskTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &SubtaskTable {
        &self.table
    }

    /// Run every subtask of `request` concurrently.
    ///
    /// Only structural problems are errors: an empty subtask list, an
    /// unknown subtask name, or the same name submitted twice.
    pub async fn dispatch(&self, request: FanOutRequest) -> AppResult<Vec<FanOutResult>> {
        if request.subtasks.is_empty() {
            return Err(AppError::InvalidRequest(
                "Fan-out request has no subtasks".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(request.subtasks.len());
        for subtask in request.subtasks {
            let entry = self.table.get(&subtask.name).ok_or_else(|| {
                AppError::InvalidRequest(format!("Unknown subtask '{}'", subtask.name))
            })?;
            if !seen.insert(subtask.name.clone()) {
                return Err(AppError::InvalidRequest(format!(
                    "Subtask '{}' submitted more than once",
                    subtask.name
                )));
            }

            let timeout = subtask.timeout.unwrap_or(entry.timeout);
            planned.push((
                subtask.name,
                Arc::clone(&entry.collaborator),
                subtask.input,
                timeout,
            ));
        }

        tracing::debug!("Dispatching {} subtasks", planned.len());

        let query: Arc<str> = Arc::from(request.query);
        let runs = planned.into_iter().map(|(name, collaborator, input, timeout)| {
            run_subtask(name, collaborator, Arc::clone(&query), input, timeout)
        });

        Ok(join_all(runs).await)
    }
}

async fn run_subtask(
    name: String,
    collaborator: Arc<dyn Collaborator>,
    query: Arc<str>,
    input: Value,
    timeout: Duration,
) -> FanOutResult {
    let started = Instant::now();
    let mut handle = tokio::spawn(async move { collaborator.call(&query, input).await });

    let result = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(payload))) => FanOutResult::ok(&name, payload, started.elapsed()),
        Ok(Ok(Err(e))) => FanOutResult::error(&name, e.to_string(), started.elapsed()),
        Ok(Err(join_error)) => FanOutResult::error(
            &name,
            format!("collaborator task failed: {}", join_error),
            started.elapsed(),
        ),
        Err(_) => {
            handle.abort();
            FanOutResult::timeout(&name, timeout, started.elapsed())
        }
    };

    tracing::info!(
        "Subtask {} finished with {} in {}ms",
        name,
        result.status.as_str(),
        result.elapsed_ms
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Subtask, SubtaskStatus};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Delayed {
        delay: Duration,
        payload: Value,
    }

    #[async_trait::async_trait]
    impl Collaborator for Delayed {
        async fn call(&self, _query: &str, _input: Value) -> AppResult<Value> {
            tokio::time::sleep(self.delay).await;
            Ok(self.payload.clone())
        }
    }

    struct Echo;

    #[async_trait::async_trait]
    impl Collaborator for Echo {
        async fn call(&self, query: &str, input: Value) -> AppResult<Value> {
            Ok(json!({ "query": query, "input": input }))
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Collaborator for Failing {
        async fn call(&self, _query: &str, _input: Value) -> AppResult<Value> {
            Err(AppError::MarketData("upstream unavailable".to_string()))
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Collaborator for Panicking {
        async fn call(&self, _query: &str, _input: Value) -> AppResult<Value> {
            panic!("collaborator bug");
        }
    }

    /// Never completes; records when its future is dropped.
    struct Hanging {
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl Collaborator for Hanging {
        async fn call(&self, _query: &str, _input: Value) -> AppResult<Value> {
            let _guard = SetOnDrop(Arc::clone(&self.dropped));
            futures::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    fn request(names: &[&str]) -> FanOutRequest {
        FanOutRequest::new(
            "Asia tech brief",
            names.iter().map(|n| Subtask::new(*n, json!({}))).collect(),
        )
    }

    #[tokio::test]
    async fn test_slow_sibling_times_out_without_blocking() {
        let dropped = Arc::new(AtomicBool::new(false));
        let table = SubtaskTable::new()
            .register(
                "a",
                Arc::new(Delayed {
                    delay: Duration::from_millis(150),
                    payload: json!({"value": 1}),
                }),
                Duration::from_millis(300),
            )
            .register(
                "b",
                Arc::new(Hanging {
                    dropped: Arc::clone(&dropped),
                }),
                Duration::from_millis(200),
            );
        let coordinator = Coordinator::new(table);

        let started = Instant::now();
        let results = coordinator.dispatch(request(&["a", "b"])).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "a");
        assert_eq!(results[0].status, SubtaskStatus::Ok);
        assert_eq!(results[0].payload, Some(json!({"value": 1})));
        assert_eq!(results[1].name, "b");
        assert_eq!(results[1].status, SubtaskStatus::Timeout);
        assert!(results[1].payload.is_none());

        // Run one after the other, a's 150ms plus b's 200ms timeout is 350ms
        assert!(elapsed >= Duration::from_millis(200), "took {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(350), "took {:?}", elapsed);

        // The aborted task is dropped once the runtime gets to it
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_each_subtask_uses_its_own_timeout() {
        let table = SubtaskTable::new()
            .register(
                "patient",
                Arc::new(Delayed {
                    delay: Duration::from_millis(120),
                    payload: json!("done"),
                }),
                Duration::from_millis(400),
            )
            .register(
                "impatient",
                Arc::new(Delayed {
                    delay: Duration::from_millis(120),
                    payload: json!("late"),
                }),
                Duration::from_millis(40),
            );
        let coordinator = Coordinator::new(table);

        let results = coordinator
            .dispatch(request(&["patient", "impatient"]))
            .await
            .unwrap();

        assert_eq!(results[0].status, SubtaskStatus::Ok);
        assert_eq!(results[0].payload, Some(json!("done")));
        assert_eq!(results[1].status, SubtaskStatus::Timeout);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_isolated() {
        let table = SubtaskTable::new()
            .register("echo", Arc::new(Echo), DEFAULT_SUBTASK_TIMEOUT)
            .register("failing", Arc::new(Failing), DEFAULT_SUBTASK_TIMEOUT)
            .register("panicking", Arc::new(Panicking), DEFAULT_SUBTASK_TIMEOUT);
        let coordinator = Coordinator::new(table);

        let results = coordinator
            .dispatch(request(&["panicking", "echo", "failing"]))
            .await
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["panicking", "echo", "failing"]);

        assert_eq!(results[0].status, SubtaskStatus::Error);
        assert!(results[0]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("collaborator task failed"));

        assert_eq!(results[1].status, SubtaskStatus::Ok);
        assert_eq!(results[1].payload.as_ref().unwrap()["query"], "Asia tech brief");

        assert_eq!(results[2].status, SubtaskStatus::Error);
        assert!(results[2]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("upstream unavailable"));
    }

    #[tokio::test]
    async fn test_request_timeout_overrides_table() {
        let table = SubtaskTable::new().register(
            "slow",
            Arc::new(Delayed {
                delay: Duration::from_millis(300),
                payload: Value::Null,
            }),
            Duration::from_secs(5),
        );
        let coordinator = Coordinator::new(table);

        let request = FanOutRequest::new(
            "q",
            vec![Subtask::new("slow", Value::Null).with_timeout(Duration::from_millis(50))],
        );
        let results = coordinator.dispatch(request).await.unwrap();
        assert_eq!(results[0].status, SubtaskStatus::Timeout);
    }

    #[tokio::test]
    async fn test_structural_errors() {
        let table = SubtaskTable::new().register("echo", Arc::new(Echo), DEFAULT_SUBTASK_TIMEOUT);
        let coordinator = Coordinator::new(table);

        assert!(matches!(
            coordinator.dispatch(request(&[])).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert!(matches!(
            coordinator.dispatch(request(&["echo", "missing"])).await,
            Err(AppError::InvalidRequest(msg)) if msg.contains("missing")
        ));
        assert!(matches!(
            coordinator.dispatch(request(&["echo", "echo"])).await,
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_table_registration() {
        let table = SubtaskTable::new()
            .register("retrieval", Arc::new(Echo), Duration::from_secs(3))
            .register("market_data", Arc::new(Echo), Duration::from_secs(5));

        assert_eq!(table.len(), 2);
        assert!(table.contains("retrieval"));
        assert_eq!(
            table.get("retrieval").unwrap().timeout,
            Duration::from_secs(3)
        );
        assert_eq!(
            table.names().collect::<Vec<_>>(),
            vec!["market_data", "retrieval"]
        );
    }
}
