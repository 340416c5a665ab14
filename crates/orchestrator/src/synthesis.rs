//! Narrative synthesis over the aggregated sections.
//!
//! [`LlmSynthesizer`] formats retrieved passages, analysis and market
//! highlights into a Handlebars prompt and asks the language model for a
//! brief.

use crate::types::{SectionEntry, SubtaskStatus};
use brief_core::config::LlmSettings;
use brief_core::{AppError, AppResult};
use brief_llm::{LlmClient, LlmRequest};
use handlebars::Handlebars;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const SYSTEM_PROMPT: &str = "You are a helpful financial assistant. Synthesize the provided data into a concise morning market brief answering the user's query. Focus on the key information requested.";

pub const DEFAULT_TEMPLATE: &str = "User Query: {{query}}

Potentially Relevant Information (from documents):
{{context}}

Quantitative Analysis Results:
{{analysis}}

Recent Market Data Highlights:
{{market_highlights}}

Generate a concise brief answering the query based *only* on the provided information. Start the brief directly without preamble.";

const TEMPLATE_NAME: &str = "brief";

/// Turns the response sections into a narrative.
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        query: &str,
        sections: &BTreeMap<String, SectionEntry>,
    ) -> AppResult<String>;
}

pub struct LlmSynthesizer {
    client: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    handlebars: Handlebars<'static>,
}

impl LlmSynthesizer {
    /// Build a synthesizer. `template` replaces the built-in user prompt.
    pub fn new(
        client: Arc<dyn LlmClient>,
        settings: &LlmSettings,
        template: Option<&str>,
    ) -> AppResult<Self> {
        let mut handlebars = Handlebars::new();
        // Plain text prompt, no HTML escaping
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(TEMPLATE_NAME, template.unwrap_or(DEFAULT_TEMPLATE))
            .map_err(|e| AppError::Config(format!("Invalid prompt template: {}", e)))?;

        Ok(Self {
            client,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            handlebars,
        })
    }

    pub fn render_prompt(
        &self,
        query: &str,
        sections: &BTreeMap<String, SectionEntry>,
    ) -> AppResult<String> {
        let mut variables = BTreeMap::new();
        variables.insert("query", query.to_string());
        variables.insert("context", format_context(sections.get("retrieval")));
        variables.insert("analysis", format_analysis(sections.get("analysis")));
        variables.insert(
            "market_highlights",
            format_market_data(sections.get("market_data")),
        );

        self.handlebars
            .render(TEMPLATE_NAME, &variables)
            .map_err(|e| AppError::Llm(format!("Failed to render prompt: {}", e)))
    }
}

#[async_trait::async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(
        &self,
        query: &str,
        sections: &BTreeMap<String, SectionEntry>,
    ) -> AppResult<String> {
        let prompt = self.render_prompt(query, sections)?;
        tracing::debug!("Synthesis prompt is {} bytes", prompt.len());

        let request = LlmRequest::new(prompt, &self.model)
            .with_system(SYSTEM_PROMPT)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self.client.complete(&request).await?;
        let narrative = response.content.trim();
        if narrative.is_empty() {
            return Err(AppError::Llm(
                "Language model returned an empty response".to_string(),
            ));
        }

        tracing::info!(
            "Synthesized brief ({} completion tokens)",
            response.usage.completion_tokens
        );
        Ok(narrative.to_string())
    }
}

fn ok_payload(section: Option<&SectionEntry>) -> Option<&Value> {
    section
        .filter(|s| s.status == SubtaskStatus::Ok)
        .and_then(|s| s.payload.as_ref())
}

/// Retrieved passages as `- text (Score: 0.83)` lines.
pub fn format_context(section: Option<&SectionEntry>) -> String {
    let lines: Vec<String> = ok_payload(section)
        .and_then(|p| p.get("results"))
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|item| {
                    let text = item.get("text")?.as_str()?;
                    let score = item.get("score").and_then(Value::as_f64).unwrap_or(0.0);
                    Some(format!("- {} (Score: {:.2})", text, score))
                })
                .collect()
        })
        .unwrap_or_default();

    if lines.is_empty() {
        return "No relevant documents found.".to_string();
    }
    lines.join("\n")
}

pub fn format_analysis(section: Option<&SectionEntry>) -> String {
    let metrics = ok_payload(section).and_then(|p| p.get("risk_metrics"));
    let exposure = metrics
        .and_then(|m| m.get("exposure_percent"))
        .and_then(Value::as_f64);

    match (metrics, exposure) {
        (Some(metrics), Some(exposure)) => {
            let region = metrics.get("region").and_then(Value::as_str).unwrap_or("");
            let sector = metrics.get("sector").and_then(Value::as_str).unwrap_or("");
            format!(
                "- {} {} Exposure: {}%",
                region,
                capitalize(sector),
                exposure
            )
        }
        _ => "No specific analysis results available.".to_string(),
    }
}

/// Per-symbol `- name (symbol): Last Price p` lines.
pub fn format_market_data(section: Option<&SectionEntry>) -> String {
    let Some(symbols) = ok_payload(section).and_then(Value::as_object) else {
        return "No specific market data highlights available.".to_string();
    };

    let mut highlights = Vec::new();
    for (symbol, data) in symbols {
        if let Some(info) = data.get("info") {
            let name = info
                .get("shortName")
                .and_then(Value::as_str)
                .unwrap_or(symbol);
            let last_price = data
                .get("price")
                .and_then(Value::as_array)
                .and_then(|p| p.last())
                .and_then(|entry| entry.get("Close"))
                .and_then(Value::as_f64)
                .map(|close| format!("{:.2}", close))
                .unwrap_or_else(|| "N/A".to_string());
            highlights.push(format!("- {} ({}): Last Price {}", name, symbol, last_price));
        } else if let Some(error) = data.get("error").and_then(Value::as_str) {
            highlights.push(format!("- {}: Error fetching data ({})", symbol, error));
        }
    }

    if highlights.is_empty() {
        return "No specific market data highlights available.".to_string();
    }
    highlights.join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
