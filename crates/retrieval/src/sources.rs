//! Passage sources beyond local files: web pages and the built-in market
//! notes.

use crate::text::html_to_text;
use crate::types::{ChunkMetadata, MetadataValue};
use brief_core::{AppError, AppResult};
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, instrument};

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 10;

const MAX_REDIRECTS: usize = 10;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; market-brief/0.1)";

/// Value of the `parser` metadata key on web passages
pub const HTML_PARSER: &str = "basic_html";

/// Notes ingested by `brief index ingest --seed`.
pub const DEFAULT_MARKET_NOTES: [&str; 5] = [
    "Market sentiment is cautiously optimistic regarding tech stocks.",
    "Rising interest rates pose a potential headwind for growth sectors.",
    "TSMC reported strong earnings, beating analyst expectations significantly.",
    "Samsung Electronics provided mixed guidance, citing chip division challenges but strong mobile sales.",
    "Geopolitical tensions in the Asia-Pacific region remain a key risk factor for semiconductor supply chains.",
];

/// Text extracted from one fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct WebPage {
    /// URL as requested
    pub url: String,
    pub text: String,
}

impl WebPage {
    /// `source_url` and `parser` entries for the page's passage.
    pub fn metadata(&self) -> ChunkMetadata {
        let mut metadata = ChunkMetadata::new();
        metadata.insert("source_url".to_string(), MetadataValue::from(self.url.as_str()));
        metadata.insert("parser".to_string(), MetadataValue::from(HTML_PARSER));
        metadata
    }
}

/// Fetches pages over HTTP, following redirects.
pub struct WebFetcher {
    client: reqwest::Client,
}

impl WebFetcher {
    pub fn new() -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Retrieval(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch `url` and extract the text of its `selector` elements.
    ///
    /// `selector` is a bare tag name such as `article` or `p`; pages without
    /// it fall back to `<body>`.
    #[instrument(skip(self))]
    pub async fn fetch_page(&self, url: &str, selector: &str) -> AppResult<WebPage> {
        validate_selector(selector)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Retrieval(format!(
                "Fetching {} returned {}",
                url, status
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to read {}: {}", url, e)))?;

        let text = html_to_text(&html, selector);
        if text.is_empty() {
            return Err(AppError::Retrieval(format!("No text content at {}", url)));
        }

        debug!("Extracted {} characters from {}", text.len(), url);
        Ok(WebPage {
            url: url.to_string(),
            text,
        })
    }

    /// Fetch every URL concurrently; results are in input order.
    pub async fn fetch_all(&self, urls: &[String], selector: &str) -> Vec<AppResult<WebPage>> {
        join_all(urls.iter().map(|url| self.fetch_page(url, selector))).await
    }
}

fn validate_selector(selector: &str) -> AppResult<()> {
    if selector.is_empty() || !selector.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidRequest(format!(
            "Selector must be a tag name, got '{}'",
            selector
        )));
    }
    Ok(())
}
