//! Portfolio exposure analysis over fetched market data.

use crate::collaborator::Collaborator;
use brief_core::config::{OrchestratorSettings, SymbolProfile};
use brief_core::{AppError, AppResult};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Computes risk metrics from per-symbol market data.
#[async_trait::async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, market_data: &Map<String, Value>, total_aum: f64) -> AppResult<Value>;
}

/// Share of the supplied market data that falls in one region and sector.
///
/// Each symbol is valued at its `marketCapUsd`, falling back to
/// `marketCap`, then `previousClose`, else zero. The percentage is relative to the total
/// value of the symbols supplied, rounded to two decimals.
#[derive(Debug, Clone)]
pub struct ExposureAnalyzer {
    region: String,
    sector: String,
    profiles: Vec<SymbolProfile>,
}

impl ExposureAnalyzer {
    pub fn new(region: impl Into<String>, sector: impl Into<String>, profiles: Vec<SymbolProfile>) -> Self {
        Self {
            region: region.into(),
            sector: sector.into(),
            profiles,
        }
    }

    pub fn from_settings(settings: &OrchestratorSettings) -> Self {
        Self::new(
            settings.analysis.region.clone(),
            settings.analysis.sector.clone(),
            settings.symbols.clone(),
        )
    }

    fn profile(&self, symbol: &str) -> Option<&SymbolProfile> {
        self.profiles.iter().find(|p| p.symbol == symbol)
    }

    fn matches(&self, symbol: &str, info: Option<&Map<String, Value>>) -> bool {
        let profile = self.profile(symbol);
        let region = profile.map(|p| p.region.as_str()).unwrap_or("Other");
        let sector = profile
            .map(|p| p.sector.as_str())
            .or_else(|| info.and_then(|i| i.get("sector")).and_then(Value::as_str))
            .unwrap_or("");

        region.eq_ignore_ascii_case(&self.region) && sector.eq_ignore_ascii_case(&self.sector)
    }

    /// Exposure percentage and the number of symbols valued.
    pub fn exposure(&self, market_data: &Map<String, Value>) -> (f64, usize) {
        let mut matching = 0.0;
        let mut total = 0.0;
        let mut considered = 0;

        for (symbol, data) in market_data {
            let info = data.get("info").and_then(Value::as_object);
            if info.is_none() {
                tracing::warn!("Missing or invalid info for symbol {}", symbol);
            }

            let value = info.map(symbol_value).unwrap_or(0.0);
            considered += 1;
            total += value;
            if self.matches(symbol, info) {
                matching += value;
            }
        }

        if total <= 0.0 {
            return (0.0, considered);
        }

        let percent = matching / total * 100.0;
        ((percent * 100.0).round() / 100.0, considered)
    }
}

fn symbol_value(info: &Map<String, Value>) -> f64 {
    let positive = |key: &str| info.get(key).and_then(Value::as_f64).filter(|v| *v > 0.0);
    positive("marketCapUsd")
        .or_else(|| positive("marketCap"))
        .or_else(|| positive("previousClose"))
        .unwrap_or(0.0)
}

#[async_trait::async_trait]
impl AnalysisService for ExposureAnalyzer {
    async fn analyze(&self, market_data: &Map<String, Value>, total_aum: f64) -> AppResult<Value> {
        let (exposure_percent, symbols_considered) = self.exposure(market_data);
        let exposure_value = (exposure_percent / 100.0 * total_aum * 100.0).round() / 100.0;

        Ok(json!({
            "risk_metrics": {
                "region": self.region,
                "sector": self.sector,
                "exposure_percent": exposure_percent,
                "exposure_value": exposure_value,
                "total_aum": total_aum,
                "symbols_considered": symbols_considered,
            }
        }))
    }
}

pub struct AnalysisCollaborator {
    service: Arc<dyn AnalysisService>,
    default_total_aum: f64,
}

impl AnalysisCollaborator {
    pub fn new(service: Arc<dyn AnalysisService>, default_total_aum: f64) -> Self {
        Self {
            service,
            default_total_aum,
        }
    }
}

#[async_trait::async_trait]
impl Collaborator for AnalysisCollaborator {
    async fn call(&self, _query: &str, input: Value) -> AppResult<Value> {
        let market_data = input
            .get("market_data")
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::Analysis("Input has no market_data object".to_string()))?;
        let total_aum = input
            .get("total_aum")
            .and_then(Value::as_f64)
            .unwrap_or(self.default_total_aum);

        self.service.analyze(market_data, total_aum).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> ExposureAnalyzer {
        ExposureAnalyzer::new(
            "Asia",
            "technology",
            vec![
                SymbolProfile::new("TSM", "Asia", "technology"),
                SymbolProfile::new("005930.KS", "Asia", "technology"),
            ],
        )
    }

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_exposure_by_market_cap() {
        let market = data(json!({
            "TSM": {"info": {"marketCap": 600.0}},
            "005930.KS": {"info": {"marketCap": 200.0}},
            "AAPL": {"info": {"marketCap": 200.0, "sector": "Technology"}},
        }));

        let (percent, considered) = analyzer().exposure(&market);
        assert_eq!(percent, 80.0);
        assert_eq!(considered, 3);
    }

    #[test]
    fn test_usd_market_cap_preferred() {
        // Samsung's cap is quoted in won; only the USD figure is comparable
        let market = data(json!({
            "TSM": {"info": {"marketCap": 900.0, "marketCapUsd": 900.0}},
            "005930.KS": {"info": {"marketCap": 1_250_000.0, "marketCapUsd": 900.0, "currency": "KRW"}},
            "XOM": {"info": {"marketCap": 200.0, "sector": "Energy"}},
        }));

        let (percent, considered) = analyzer().exposure(&market);
        assert_eq!(percent, 90.0);
        assert_eq!(considered, 3);
    }

    #[test]
    fn test_previous_close_fallback_and_rounding() {
        let market = data(json!({
            "TSM": {"info": {"marketCap": 0, "previousClose": 100.0}},
            "XOM": {"info": {"previousClose": 200.0, "sector": "Energy"}},
        }));

        let (percent, _) = analyzer().exposure(&market);
        assert_eq!(percent, 33.33);
    }

    #[test]
    fn test_sector_falls_back_to_quote_info() {
        let analyzer = ExposureAnalyzer::new(
            "Other",
            "technology",
            vec![SymbolProfile::new("TSM", "Asia", "technology")],
        );
        let market = data(json!({
            "TSM": {"info": {"marketCap": 100.0}},
            "MSFT": {"info": {"marketCap": 100.0, "sector": "Technology"}},
        }));

        assert_eq!(analyzer.exposure(&market).0, 50.0);
    }

    #[test]
    fn test_zero_total_value() {
        let market = data(json!({"TSM": {"error": "down"}}));
        assert_eq!(analyzer().exposure(&market), (0.0, 1));
        assert_eq!(analyzer().exposure(&Map::new()), (0.0, 0));
    }

    #[tokio::test]
    async fn test_collaborator_output_shape() {
        let collaborator = AnalysisCollaborator::new(Arc::new(analyzer()), 1_000_000.0);
        let output = collaborator
            .call(
                "What's our exposure?",
                json!({
                    "market_data": {"TSM": {"info": {"marketCap": 10.0}}},
                    "total_aum": 500_000.0
                }),
            )
            .await
            .unwrap();

        let metrics = &output["risk_metrics"];
        assert_eq!(metrics["region"], "Asia");
        assert_eq!(metrics["sector"], "technology");
        assert_eq!(metrics["exposure_percent"], 100.0);
        assert_eq!(metrics["exposure_value"], 500_000.0);
        assert_eq!(metrics["symbols_considered"], 1);
    }

    #[tokio::test]
    async fn test_collaborator_requires_market_data() {
        let collaborator = AnalysisCollaborator::new(Arc::new(analyzer()), 1_000_000.0);
        assert!(matches!(
            collaborator.call("q", json!({})).await,
            Err(AppError::Analysis(_))
        ));
    }
}
