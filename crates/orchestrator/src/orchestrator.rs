//! Two-stage brief pipeline.
//!
//! Stage one fans out retrieval and market data. Stage two runs the
//! exposure analysis on whichever symbols stage one fetched. All results
//! then go through the aggregator.

use crate::aggregator::Aggregator;
use crate::collaborators::{
    AnalysisCollaborator, ExposureAnalyzer, MarketDataCollaborator, RetrievalCollaborator,
    YahooFinanceClient,
};
use crate::coordinator::{Coordinator, SubtaskTable, DEFAULT_SUBTASK_TIMEOUT};
use crate::synthesis::{LlmSynthesizer, Synthesizer};
use crate::types::{AggregatedResponse, FanOutRequest, FanOutResult, Subtask};
use brief_core::config::{AppConfig, OrchestratorSettings};
use brief_core::AppResult;
use brief_retrieval::{create_provider, RetrievalService};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const RETRIEVAL: &str = "retrieval";
pub const MARKET_DATA: &str = "market_data";
pub const ANALYSIS: &str = "analysis";

pub struct Orchestrator {
    coordinator: Coordinator,
    aggregator: Aggregator,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        table: SubtaskTable,
        synthesizer: Arc<dyn Synthesizer>,
        settings: OrchestratorSettings,
    ) -> Self {
        let aggregator = Aggregator::new(
            synthesizer,
            settings.context_sources.clone(),
            settings.synthesis_timeout(),
        );
        Self {
            coordinator: Coordinator::new(table),
            aggregator,
            settings,
        }
    }

    /// Answer a query. Never fails; problems are reported in the response.
    pub async fn handle(&self, query: &str) -> AggregatedResponse {
        let query = query.trim();
        if query.is_empty() {
            return AggregatedResponse::invalid_request(query, "Query is empty");
        }

        tracing::info!("Handling brief request");

        let symbols: Vec<&str> = self
            .settings
            .symbols
            .iter()
            .map(|p| p.symbol.as_str())
            .collect();
        let stage_one = FanOutRequest::new(
            query,
            vec![
                Subtask::new(RETRIEVAL, json!({ "top_k": self.settings.top_k })),
                Subtask::new(MARKET_DATA, json!({ "symbols": symbols })),
            ],
        );

        let mut results = match self.coordinator.dispatch(stage_one).await {
            Ok(results) => results,
            Err(e) => return AggregatedResponse::invalid_request(query, e.to_string()),
        };

        let analysis = self.run_analysis(query, &results).await;
        results.push(analysis);

        self.aggregator.aggregate(query, results).await
    }

    async fn run_analysis(&self, query: &str, stage_one: &[FanOutResult]) -> FanOutResult {
        let valid = stage_one
            .iter()
            .find(|r| r.name == MARKET_DATA && r.is_ok())
            .and_then(|r| r.payload.as_ref())
            .map(valid_market_data)
            .unwrap_or_default();

        if valid.is_empty() {
            return FanOutResult::error(ANALYSIS, "no valid market data for analysis", Duration::ZERO);
        }

        let request = FanOutRequest::new(
            query,
            vec![Subtask::new(
                ANALYSIS,
                json!({
                    "market_data": valid,
                    "total_aum": self.settings.analysis.total_aum,
                }),
            )],
        );

        match self.coordinator.dispatch(request).await {
            Ok(mut results) if !results.is_empty() => results.remove(0),
            Ok(_) => FanOutResult::error(ANALYSIS, "analysis returned no result", Duration::ZERO),
            Err(e) => FanOutResult::error(ANALYSIS, e.to_string(), Duration::ZERO),
        }
    }
}

/// Symbols whose market data carries no error entry.
fn valid_market_data(payload: &Value) -> Map<String, Value> {
    payload
        .as_object()
        .map(|symbols| {
            symbols
                .iter()
                .filter(|(_, data)| data.get("error").is_none())
                .map(|(symbol, data)| (symbol.clone(), data.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Wire the production collaborators from configuration.
pub fn build_orchestrator(config: &AppConfig) -> AppResult<Orchestrator> {
    let embedder = create_provider(&config.embedding)?;
    let retrieval = Arc::new(RetrievalService::open(
        &config.index_dir(),
        &config.index,
        embedder,
    )?);
    build_orchestrator_with_retrieval(config, retrieval)
}

/// Like [`build_orchestrator`], reusing an already opened retrieval service.
pub fn build_orchestrator_with_retrieval(
    config: &AppConfig,
    retrieval: Arc<RetrievalService>,
) -> AppResult<Orchestrator> {
    let settings = &config.orchestrator;
    let timeout = |name: &str| {
        settings
            .subtask_timeout(name)
            .unwrap_or(DEFAULT_SUBTASK_TIMEOUT)
    };

    let market_client = Arc::new(YahooFinanceClient::new(&config.market_data)?);
    let symbols = settings.symbols.iter().map(|p| p.symbol.clone()).collect();

    let table = SubtaskTable::new()
        .register(
            RETRIEVAL,
            Arc::new(RetrievalCollaborator::new(retrieval, settings.top_k)),
            timeout(RETRIEVAL),
        )
        .register(
            MARKET_DATA,
            Arc::new(MarketDataCollaborator::new(market_client, symbols)),
            timeout(MARKET_DATA),
        )
        .register(
            ANALYSIS,
            Arc::new(AnalysisCollaborator::new(
                Arc::new(ExposureAnalyzer::from_settings(settings)),
                settings.analysis.total_aum,
            )),
            timeout(ANALYSIS),
        );

    let client = brief_llm::create_client(&config.llm)?;
    let synthesizer = LlmSynthesizer::new(client, &config.llm, settings.prompt_template.as_deref())?;

    tracing::debug!(
        "Orchestrator ready: llm={} model={} subtasks={}",
        config.llm.provider,
        config.llm.model,
        table.len()
    );

    Ok(Orchestrator::new(
        table,
        Arc::new(synthesizer),
        settings.clone(),
    ))
}
