//! Fan-out request, result and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// One named unit of work inside a fan-out request.
#[derive(Debug, Clone)]
pub struct Subtask {
    /// Name of an entry in the subtask table
    pub name: String,

    /// Collaborator-specific input
    pub input: Value,

    /// Overrides the table's default timeout for this call
    pub timeout: Option<Duration>,
}

impl Subtask {
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FanOutRequest {
    pub query: String,
    pub subtasks: Vec<Subtask>,
}

impl FanOutRequest {
    pub fn new(query: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        Self {
            query: query.into(),
            subtasks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Ok,
    Timeout,
    Error,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

/// Outcome of one subtask. `payload` is set only for `Ok`, `error_detail`
/// only otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutResult {
    pub name: String,
    pub status: SubtaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub elapsed_ms: u64,
}

impl FanOutResult {
    pub fn ok(name: impl Into<String>, payload: Value, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: SubtaskStatus::Ok,
            payload: Some(payload),
            error_detail: None,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn timeout(name: impl Into<String>, limit: Duration, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: SubtaskStatus::Timeout,
            payload: None,
            error_detail: Some(format!("timed out after {}ms", limit.as_millis())),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn error(name: impl Into<String>, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: SubtaskStatus::Error,
            payload: None,
            error_detail: Some(detail.into()),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SubtaskStatus::Ok
    }
}

/// Overall status of an aggregated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Every section succeeded and a narrative was produced
    Ok,
    /// A narrative was produced but at least one section failed
    Degraded,
    /// No context source succeeded; synthesis was skipped
    InsufficientContext,
    /// Sections are present but synthesis failed or timed out
    SynthesisFailed,
    /// The request was rejected before dispatch
    InvalidRequest,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::InsufficientContext => "insufficient_context",
            Self::SynthesisFailed => "synthesis_failed",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

/// One section of the response, keyed by subtask name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionEntry {
    pub status: SubtaskStatus,
    pub payload: Option<Value>,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FanOutResult> for SectionEntry {
    fn from(result: &FanOutResult) -> Self {
        Self {
            status: result.status,
            payload: result.payload.clone(),
            degraded: !result.is_ok(),
            error: result.error_detail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResponse {
    pub query: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub sections: BTreeMap<String, SectionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AggregatedResponse {
    /// Response for a request rejected before any collaborator ran.
    pub fn invalid_request(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            status: ResponseStatus::InvalidRequest,
            narrative: None,
            sections: BTreeMap::new(),
            synthesis_error: None,
            error: Some(error.into()),
        }
    }
}
