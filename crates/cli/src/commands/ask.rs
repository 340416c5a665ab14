//! Ask command handler.
//!
//! Runs the full brief pipeline for one query.

use brief_core::{config::AppConfig, AppResult};
use brief_orchestrator::{build_orchestrator, AggregatedResponse, ResponseStatus};
use clap::Args;

/// Ask for a market brief
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to answer
    pub query: String,

    /// Output the full response as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing ask command");

        let orchestrator = build_orchestrator(config)?;
        let response = orchestrator.handle(&self.query).await;

        tracing::debug!("Brief finished with status {}", response.status.as_str());

        if self.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            print!("{}", render(&response));
        }

        Ok(())
    }
}

fn render(response: &AggregatedResponse) -> String {
    let mut out = String::new();

    match (&response.narrative, response.status) {
        (Some(narrative), _) => {
            out.push_str(narrative);
            out.push_str("\n\n");
        }
        (None, ResponseStatus::InsufficientContext) => {
            out.push_str("Not enough context to write a brief.\n\n");
        }
        (None, _) => {
            let reason = response
                .synthesis_error
                .as_deref()
                .or(response.error.as_deref())
                .unwrap_or("unknown error");
            out.push_str(&format!("No brief produced: {}\n\n", reason));
        }
    }

    out.push_str(&format!("Status: {}\n", response.status.as_str()));
    for (name, section) in &response.sections {
        match &section.error {
            Some(error) => out.push_str(&format!(
                "- {}: {} ({})\n",
                name,
                section.status.as_str(),
                error
            )),
            None => out.push_str(&format!("- {}: {}\n", name, section.status.as_str())),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use brief_orchestrator::{FanOutResult, SectionEntry};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[test]
    fn test_render_degraded_brief() {
        let sections = BTreeMap::from([
            (
                "market_data".to_string(),
                SectionEntry::from(&FanOutResult::timeout(
                    "market_data",
                    Duration::from_millis(5000),
                    Duration::from_millis(5001),
                )),
            ),
            (
                "retrieval".to_string(),
                SectionEntry::from(&FanOutResult::ok(
                    "retrieval",
                    json!({"results": []}),
                    Duration::ZERO,
                )),
            ),
        ]);
        let response = AggregatedResponse {
            query: "q".to_string(),
            status: ResponseStatus::Degraded,
            narrative: Some("TSMC beat estimates.".to_string()),
            sections,
            synthesis_error: None,
            error: None,
        };

        let text = render(&response);
        assert!(text.starts_with("TSMC beat estimates.\n\n"));
        assert!(text.contains("Status: degraded"));
        assert!(text.contains("- market_data: timeout (timed out after 5000ms)"));
        assert!(text.contains("- retrieval: ok\n"));
    }

    #[test]
    fn test_render_invalid_request() {
        let response = AggregatedResponse::invalid_request("", "Query is empty");
        let text = render(&response);
        assert!(text.contains("No brief produced: Query is empty"));
        assert!(text.contains("Status: invalid_request"));
    }
}
