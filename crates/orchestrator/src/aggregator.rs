//! Response aggregation.
//!
//! Every subtask result becomes a section. Failed sections are kept as
//! degraded placeholders so callers always see which part is missing.

use crate::synthesis::Synthesizer;
use crate::types::{AggregatedResponse, FanOutResult, ResponseStatus, SectionEntry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct Aggregator {
    synthesizer: Arc<dyn Synthesizer>,
    context_sources: Vec<String>,
    synthesis_timeout: Duration,
}

impl Aggregator {
    /// `context_sources` names the subtasks whose success makes synthesis
    /// worthwhile.
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        context_sources: Vec<String>,
        synthesis_timeout: Duration,
    ) -> Self {
        Self {
            synthesizer,
            context_sources,
            synthesis_timeout,
        }
    }

    pub async fn aggregate(&self, query: &str, results: Vec<FanOutResult>) -> AggregatedResponse {
        let has_context = results
            .iter()
            .filter(|r| self.context_sources.contains(&r.name))
            .any(FanOutResult::is_ok);

        let sections: BTreeMap<String, SectionEntry> = results
            .iter()
            .map(|r| (r.name.clone(), SectionEntry::from(r)))
            .collect();
        let all_ok = results.iter().all(FanOutResult::is_ok);

        let mut response = AggregatedResponse {
            query: query.to_string(),
            status: ResponseStatus::InsufficientContext,
            narrative: None,
            sections,
            synthesis_error: None,
            error: None,
        };

        if !has_context {
            tracing::warn!("No context source succeeded, skipping synthesis");
            return response;
        }

        let synthesis = tokio::time::timeout(
            self.synthesis_timeout,
            self.synthesizer.synthesize(query, &response.sections),
        )
        .await;

        match synthesis {
            Ok(Ok(narrative)) => {
                response.status = if all_ok {
                    ResponseStatus::Ok
                } else {
                    ResponseStatus::Degraded
                };
                response.narrative = Some(narrative);
            }
            Ok(Err(e)) => {
                tracing::error!("Synthesis failed: {}", e);
                response.status = ResponseStatus::SynthesisFailed;
                response.synthesis_error = Some(e.to_string());
            }
            Err(_) => {
                tracing::error!(
                    "Synthesis timed out after {}ms",
                    self.synthesis_timeout.as_millis()
                );
                response.status = ResponseStatus::SynthesisFailed;
                response.synthesis_error = Some(format!(
                    "synthesis timed out after {}ms",
                    self.synthesis_timeout.as_millis()
                ));
            }
        }

        response
    }
}
