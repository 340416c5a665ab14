//! Request orchestration for market briefs.
//!
//! A query fans out to independent collaborators (retrieval, market data,
//! analysis), each under its own timeout. Partial results are aggregated
//! into sections and, when there is enough context, synthesized into a
//! narrative by a language model.

pub mod aggregator;
pub mod collaborator;
pub mod collaborators;
pub mod coordinator;
pub mod orchestrator;
pub mod synthesis;
pub mod types;


// Re-export commonly used types
pub use aggregator::Aggregator;
pub use collaborator::Collaborator;
pub use coordinator::{Coordinator, SubtaskTable};
pub use orchestrator::{build_orchestrator, build_orchestrator_with_retrieval, Orchestrator};
pub use synthesis::{LlmSynthesizer, Synthesizer};
pub use types::{
    AggregatedResponse, FanOutRequest, FanOutResult, ResponseStatus, SectionEntry, Subtask,
    SubtaskStatus,
};
