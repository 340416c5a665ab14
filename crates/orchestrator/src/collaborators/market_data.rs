//! Market data for the tracked symbols.
//!
//! Quotes come from the Yahoo Finance chart endpoint and are reshaped into
//! the `{ "info": {...}, "price": [{"Close": ..}] }` form the analysis and
//! synthesis steps read. The quote summary endpoint adds `marketCap`,
//! `sector`, `industry` and `country` when it answers, and market caps in
//! other currencies are converted to `marketCapUsd` through the currency's
//! `XXXUSD=X` chart.

use crate::collaborator::Collaborator;
use brief_core::config::MarketDataSettings;
use brief_core::{AppError, AppResult};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 200;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; market-brief/0.1)";

/// Source of per-symbol quote data.
#[async_trait::async_trait]
pub trait MarketDataClient: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> AppResult<Value>;
}

/// Fetches every requested symbol concurrently.
///
/// A failed symbol becomes `{"error": ...}` in the output; the call itself
/// fails only when no symbol could be fetched.
pub struct MarketDataCollaborator {
    client: Arc<dyn MarketDataClient>,
    default_symbols: Vec<String>,
}

impl MarketDataCollaborator {
    pub fn new(client: Arc<dyn MarketDataClient>, default_symbols: Vec<String>) -> Self {
        Self {
            client,
            default_symbols,
        }
    }

    fn symbols(&self, input: &Value) -> Vec<String> {
        match input.get("symbols").and_then(Value::as_array) {
            Some(symbols) => symbols
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => self.default_symbols.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Collaborator for MarketDataCollaborator {
    async fn call(&self, _query: &str, input: Value) -> AppResult<Value> {
        let symbols = self.symbols(&input);
        if symbols.is_empty() {
            return Err(AppError::MarketData("No symbols requested".to_string()));
        }

        let quotes = join_all(symbols.iter().map(|s| self.client.fetch_quote(s))).await;

        let mut output = Map::new();
        let mut failures = Vec::new();
        for (symbol, quote) in symbols.into_iter().zip(quotes) {
            match quote {
                Ok(data) => {
                    output.insert(symbol, data);
                }
                Err(e) => {
                    warn!("Market data for {} failed: {}", symbol, e);
                    failures.push(format!("{}: {}", symbol, e));
                    output.insert(
                        symbol.clone(),
                        json!({ "error": format!("Failed to fetch data for {}: {}", symbol, e) }),
                    );
                }
            }
        }

        if failures.len() == output.len() {
            return Err(AppError::MarketData(format!(
                "All symbols failed ({})",
                failures.join("; ")
            )));
        }

        Ok(Value::Object(output))
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    long_name: Option<String>,
    #[serde(default)]
    regular_market_price: Option<f64>,
    #[serde(default)]
    previous_close: Option<f64>,
    #[serde(default)]
    chart_previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Option<Vec<SummaryResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResult {
    #[serde(default)]
    price: Option<SummaryPrice>,
    #[serde(default)]
    asset_profile: Option<AssetProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPrice {
    #[serde(default)]
    market_cap: Option<RawNumber>,
    #[serde(default)]
    currency: Option<String>,
}

/// Yahoo's `{"raw": 1.0, "fmt": "1.00"}` number; either key may be absent.
#[derive(Debug, Deserialize)]
struct RawNumber {
    #[serde(default)]
    raw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AssetProfile {
    #[serde(default)]
    sector: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

struct FetchFailure {
    error: AppError,
    retryable: bool,
}

/// HTTP client for the Yahoo Finance chart API.
pub struct YahooFinanceClient {
    client: reqwest::Client,
    endpoint: String,
    max_retries: u32,
}

impl YahooFinanceClient {
    pub fn new(settings: &MarketDataSettings) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::MarketData(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            max_retries: settings.max_retries,
        })
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}?range=1d&interval=1d",
            self.endpoint, symbol
        )
    }

    fn summary_url(&self, symbol: &str) -> String {
        format!(
            "{}/v10/finance/quoteSummary/{}?modules=price,assetProfile",
            self.endpoint, symbol
        )
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, FetchFailure> {
        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await.map_err(|e| FetchFailure {
            error: AppError::MarketData(format!("Request for {} failed: {}", symbol, e)),
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchFailure {
                error: AppError::MarketData(format!(
                    "Quote API error for {} ({}): {}",
                    symbol, status, body
                )),
                retryable: status.is_server_error() || status.as_u16() == 429,
            });
        }

        response.json().await.map_err(|e| FetchFailure {
            error: AppError::MarketData(format!("Invalid quote response for {}: {}", symbol, e)),
            retryable: false,
        })
    }

    /// GET `url` as JSON, retrying transient failures `max_retries` times.
    async fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> AppResult<T> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, symbol).await {
                Ok(body) => return Ok(body),
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    warn!(
                        "Quote for {} failed (attempt {}/{}), retrying in {}ms",
                        symbol,
                        attempt,
                        self.max_retries + 1,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn fetch_chart(&self, symbol: &str) -> AppResult<Value> {
        let body: ChartResponse = self.get_json(&self.chart_url(symbol), symbol).await?;
        parse_chart(symbol, body)
    }

    async fn fetch_summary(&self, symbol: &str) -> AppResult<Map<String, Value>> {
        let body: SummaryResponse = self.get_json(&self.summary_url(symbol), symbol).await?;
        parse_summary(symbol, body)
    }

    /// USD per one unit of `currency`.
    async fn usd_rate(&self, currency: &str) -> AppResult<f64> {
        let Some((pair, scale)) = fx_pair(currency) else {
            return Ok(1.0);
        };
        let quote = self.fetch_chart(&pair).await?;
        quote["info"]["regularMarketPrice"]
            .as_f64()
            .filter(|rate| *rate > 0.0)
            .map(|rate| rate * scale)
            .ok_or_else(|| AppError::MarketData(format!("No exchange rate in {}", pair)))
    }
}

#[async_trait::async_trait]
impl MarketDataClient for YahooFinanceClient {
    #[instrument(skip(self), fields(provider = "yahoo"))]
    async fn fetch_quote(&self, symbol: &str) -> AppResult<Value> {
        let mut quote = self.fetch_chart(symbol).await?;

        match self.fetch_summary(symbol).await {
            Ok(fields) => merge_info(&mut quote, fields),
            Err(e) => warn!("Quote summary for {} unavailable: {}", symbol, e),
        }

        let market_cap = quote["info"]["marketCap"].as_f64();
        let currency = quote["info"]["currency"].as_str().unwrap_or("USD").to_string();
        if let Some(market_cap) = market_cap {
            match self.usd_rate(&currency).await {
                Ok(rate) => {
                    let mut fields = Map::new();
                    fields.insert("marketCapUsd".to_string(), json!(market_cap * rate));
                    merge_info(&mut quote, fields);
                }
                Err(e) => warn!("No {} to USD rate for {}: {}", currency, symbol, e),
            }
        }

        Ok(quote)
    }
}

/// Chart symbol quoting `currency` in USD, with the factor from the quoted
/// unit. Minor units (pence, cents, agorot) scale by 1/100. `None` for USD.
fn fx_pair(currency: &str) -> Option<(String, f64)> {
    match currency {
        c if c.eq_ignore_ascii_case("USD") => None,
        "GBp" | "GBX" => Some(("GBPUSD=X".to_string(), 0.01)),
        "ZAc" | "ZAC" => Some(("ZARUSD=X".to_string(), 0.01)),
        "ILA" => Some(("ILSUSD=X".to_string(), 0.01)),
        c => Some((format!("{}USD=X", c.to_ascii_uppercase()), 1.0)),
    }
}

fn merge_info(quote: &mut Value, fields: Map<String, Value>) {
    if let Some(info) = quote.get_mut("info").and_then(Value::as_object_mut) {
        info.extend(fields);
    }
}

fn parse_summary(symbol: &str, body: SummaryResponse) -> AppResult<Map<String, Value>> {
    if let Some(error) = body.quote_summary.error {
        return Err(AppError::MarketData(format!(
            "{} for {}: {}",
            error.code, symbol, error.description
        )));
    }

    let result = body
        .quote_summary
        .result
        .and_then(|mut results| results.pop())
        .ok_or_else(|| AppError::MarketData(format!("No summary found for symbol {}", symbol)))?;

    let mut fields = Map::new();
    if let Some(price) = result.price {
        if let Some(cap) = price.market_cap.and_then(|c| c.raw).filter(|c| *c > 0.0) {
            fields.insert("marketCap".to_string(), json!(cap));
        }
        if let Some(currency) = price.currency {
            fields.insert("currency".to_string(), json!(currency));
        }
    }
    if let Some(profile) = result.asset_profile {
        for (key, value) in [
            ("sector", profile.sector),
            ("industry", profile.industry),
            ("country", profile.country),
        ] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                fields.insert(key.to_string(), json!(value));
            }
        }
    }

    Ok(fields)
}

fn parse_chart(symbol: &str, body: ChartResponse) -> AppResult<Value> {
    if let Some(error) = body.chart.error {
        return Err(AppError::MarketData(format!(
            "{} for {}: {}",
            error.code, symbol, error.description
        )));
    }

    let result = body
        .chart
        .result
        .and_then(|mut results| results.pop())
        .ok_or_else(|| AppError::MarketData(format!("No data found for symbol {}", symbol)))?;

    let meta = result.meta;
    let last_close = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .and_then(|q| q.close.into_iter().rev().flatten().next())
        .or(meta.regular_market_price);

    let previous_close = meta.previous_close.or(meta.chart_previous_close);
    let short_name = meta
        .short_name
        .or(meta.long_name)
        .unwrap_or_else(|| symbol.to_string());

    let mut info = Map::new();
    info.insert("symbol".to_string(), json!(symbol));
    info.insert("shortName".to_string(), json!(short_name));
    if let Some(currency) = meta.currency {
        info.insert("currency".to_string(), json!(currency));
    }
    if let Some(price) = meta.regular_market_price {
        info.insert("regularMarketPrice".to_string(), json!(price));
    }
    if let Some(close) = previous_close {
        info.insert("previousClose".to_string(), json!(close));
    }

    let price = match last_close {
        Some(close) => json!([{ "Close": close }]),
        None => json!([]),
    };

    Ok(json!({ "info": info, "price": price }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP server answering GETs by path prefix; anything else is 404.
    async fn serve(routes: Vec<(&'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let path = request.split_whitespace().nth(1).unwrap_or("/");

                let (status, body) = routes
                    .iter()
                    .find(|(prefix, _)| path.starts_with(prefix))
                    .map(|(_, body)| ("200 OK", *body))
                    .unwrap_or(("404 Not Found", "{}"));
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        format!("http://{}", addr)
    }

    fn yahoo(endpoint: String) -> YahooFinanceClient {
        YahooFinanceClient::new(&MarketDataSettings {
            endpoint,
            max_retries: 0,
        })
        .unwrap()
    }

    const SAMSUNG_CHART: &str = r#"{"chart":{"result":[{"meta":{"currency":"KRW","shortName":"SamsungElec","regularMarketPrice":71000.0,"chartPreviousClose":70500.0},"indicators":{"quote":[{"close":[71000.0]}]}}],"error":null}}"#;

    const SAMSUNG_SUMMARY: &str = r#"{"quoteSummary":{"result":[{"price":{"marketCap":{"raw":423000000000000,"fmt":"423T"},"currency":"KRW"},"assetProfile":{"sector":"Technology","industry":"Consumer Electronics","country":"South Korea"}}],"error":null}}"#;

    const KRW_USD_CHART: &str = r#"{"chart":{"result":[{"meta":{"currency":"USD","regularMarketPrice":0.00072}}],"error":null}}"#;

    struct FixedQuotes(HashMap<&'static str, AppResult<Value>>);

    #[async_trait::async_trait]
    impl MarketDataClient for FixedQuotes {
        async fn fetch_quote(&self, symbol: &str) -> AppResult<Value> {
            match self.0.get(symbol) {
                Some(Ok(v)) => Ok(v.clone()),
                Some(Err(e)) => Err(AppError::MarketData(e.to_string())),
                None => Err(AppError::MarketData(format!("unknown symbol {}", symbol))),
            }
        }
    }

    fn collaborator(quotes: Vec<(&'static str, AppResult<Value>)>) -> MarketDataCollaborator {
        MarketDataCollaborator::new(
            Arc::new(FixedQuotes(quotes.into_iter().collect())),
            vec!["TSM".to_string(), "005930.KS".to_string()],
        )
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_inline() {
        let collaborator = collaborator(vec![(
            "TSM",
            Ok(json!({"info": {"shortName": "TSMC"}, "price": [{"Close": 181.2}]})),
        )]);

        let output = collaborator.call("brief", Value::Null).await.unwrap();
        assert_eq!(output["TSM"]["info"]["shortName"], "TSMC");
        assert!(output["005930.KS"]["error"]
            .as_str()
            .unwrap()
            .contains("005930.KS"));
    }

    #[tokio::test]
    async fn test_all_symbols_failing_fails_the_call() {
        let collaborator = collaborator(Vec::new());
        let err = collaborator.call("brief", Value::Null).await.unwrap_err();
        assert!(matches!(err, AppError::MarketData(_)));
    }

    #[tokio::test]
    async fn test_symbols_from_input() {
        let collaborator = collaborator(vec![("NVDA", Ok(json!({"info": {}})))]);
        let output = collaborator
            .call("brief", json!({"symbols": ["NVDA"]}))
            .await
            .unwrap();

        let keys: Vec<_> = output.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["NVDA".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_symbol_list_fails() {
        let collaborator = collaborator(Vec::new());
        assert!(collaborator
            .call("brief", json!({"symbols": []}))
            .await
            .is_err());
    }

    #[test]
    fn test_parse_chart_response() {
        let raw = r#"{
            "chart": {
                "result": [{
                    "meta": {
                        "currency": "USD",
                        "symbol": "TSM",
                        "shortName": "Taiwan Semiconductor Manufacturing",
                        "regularMarketPrice": 182.5,
                        "chartPreviousClose": 179.1
                    },
                    "indicators": {"quote": [{"close": [180.0, 182.5, null]}]}
                }],
                "error": null
            }
        }"#;
        let body: ChartResponse = serde_json::from_str(raw).unwrap();
        let quote = parse_chart("TSM", body).unwrap();

        assert_eq!(
            quote["info"]["shortName"],
            "Taiwan Semiconductor Manufacturing"
        );
        assert_eq!(quote["info"]["currency"], "USD");
        assert_eq!(quote["info"]["previousClose"], 179.1);
        assert_eq!(quote["price"][0]["Close"], 182.5);
    }

    #[test]
    fn test_parse_chart_error() {
        let raw = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let body: ChartResponse = serde_json::from_str(raw).unwrap();
        let err = parse_chart("XXXX", body).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn test_chart_url() {
        let client = YahooFinanceClient::new(&MarketDataSettings {
            endpoint: "https://query1.finance.yahoo.com/".to_string(),
            max_retries: 0,
        })
        .unwrap();
        assert_eq!(
            client.chart_url("005930.KS"),
            "https://query1.finance.yahoo.com/v8/finance/chart/005930.KS?range=1d&interval=1d"
        );
    }

    #[test]
    fn test_parse_summary_response() {
        let body: SummaryResponse = serde_json::from_str(SAMSUNG_SUMMARY).unwrap();
        let fields = parse_summary("005930.KS", body).unwrap();

        assert_eq!(fields["marketCap"], 423_000_000_000_000.0);
        assert_eq!(fields["currency"], "KRW");
        assert_eq!(fields["sector"], "Technology");
        assert_eq!(fields["industry"], "Consumer Electronics");
        assert_eq!(fields["country"], "South Korea");
    }

    #[test]
    fn test_parse_summary_missing_values() {
        let raw = r#"{"quoteSummary":{"result":[{"price":{"marketCap":{},"currency":"USD"},"assetProfile":{"sector":""}}],"error":null}}"#;
        let body: SummaryResponse = serde_json::from_str(raw).unwrap();
        let fields = parse_summary("SPY", body).unwrap();

        assert!(fields.get("marketCap").is_none());
        assert!(fields.get("sector").is_none());
        assert_eq!(fields["currency"], "USD");

        let raw = r#"{"quoteSummary":{"result":null,"error":{"code":"Not Found","description":"Quote not found for symbol: XXXX"}}}"#;
        let body: SummaryResponse = serde_json::from_str(raw).unwrap();
        assert!(parse_summary("XXXX", body).is_err());
    }

    #[test]
    fn test_fx_pair() {
        assert_eq!(fx_pair("USD"), None);
        assert_eq!(fx_pair("KRW"), Some(("KRWUSD=X".to_string(), 1.0)));
        assert_eq!(fx_pair("twd"), Some(("TWDUSD=X".to_string(), 1.0)));
        assert_eq!(fx_pair("GBp"), Some(("GBPUSD=X".to_string(), 0.01)));
    }

    #[tokio::test]
    async fn test_fetch_quote_adds_market_cap_sector_and_usd_value() {
        let endpoint = serve(vec![
            ("/v8/finance/chart/005930.KS", SAMSUNG_CHART),
            ("/v10/finance/quoteSummary/005930.KS", SAMSUNG_SUMMARY),
            ("/v8/finance/chart/KRWUSD=X", KRW_USD_CHART),
        ])
        .await;

        let quote = yahoo(endpoint).fetch_quote("005930.KS").await.unwrap();
        let info = &quote["info"];

        assert_eq!(info["shortName"], "SamsungElec");
        assert_eq!(info["sector"], "Technology");
        assert_eq!(info["marketCap"], 423_000_000_000_000.0);
        let usd = info["marketCapUsd"].as_f64().unwrap();
        assert!((usd - 304_560_000_000.0).abs() < 1.0, "got {}", usd);
        assert_eq!(quote["price"][0]["Close"], 71000.0);
    }

    #[tokio::test]
    async fn test_fetch_quote_without_summary_keeps_chart_data() {
        let endpoint = serve(vec![("/v8/finance/chart/005930.KS", SAMSUNG_CHART)]).await;

        let quote = yahoo(endpoint).fetch_quote("005930.KS").await.unwrap();
        assert_eq!(quote["info"]["previousClose"], 70500.0);
        assert!(quote["info"].get("marketCap").is_none());
        assert!(quote["info"].get("marketCapUsd").is_none());
    }

    #[tokio::test]
    async fn test_fetch_quote_fails_when_chart_fails() {
        let endpoint = serve(Vec::new()).await;
        let err = yahoo(endpoint).fetch_quote("TSM").await.unwrap_err();
        assert!(matches!(err, AppError::MarketData(msg) if msg.contains("404")));
    }
}
