//! Configuration management for the market brief assistant.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - Config file (`.brief/config.yaml` or `BRIEF_CONFIG`)
//! - Environment variables
//! - Command-line flags (`AppConfig::with_overrides`)
//!
//! The configuration is workspace-centric, with persisted state under `.brief/`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .brief/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Log line format
    pub log_format: LogFormat,

    /// Language-model settings for the synthesis step
    pub llm: LlmSettings,

    /// Embedding collaborator settings
    pub embedding: EmbeddingConfig,

    /// Vector index persistence settings
    pub index: IndexSettings,

    /// Fan-out and aggregation settings
    pub orchestrator: OrchestratorSettings,

    /// Market-data collaborator settings
    pub market_data: MarketDataSettings,
}

/// Language-model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmSettings {
    /// Provider name (e.g., "ollama")
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Optional custom endpoint
    pub endpoint: Option<String>,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            endpoint: None,
            temperature: 0.3,
            max_tokens: 1000,
        }
    }
}

/// Embedding collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions; fixes the index dimension
    pub dimensions: usize,

    /// Optional custom endpoint for HTTP providers
    pub endpoint: Option<String>,

    /// Retries after the first attempt for HTTP providers
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
            max_retries: 3,
        }
    }
}

/// Vector index persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexSettings {
    /// Index directory; relative paths resolve against the workspace
    pub path: PathBuf,

    /// Start with an empty index when the persisted one cannot be loaded.
    /// The unloadable files are moved aside as `*.corrupt` first.
    pub fallback_to_empty_on_load_error: bool,

    /// Persist after every ingest batch
    pub persist_after_ingest: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".brief/index"),
            fallback_to_empty_on_load_error: false,
            persist_after_ingest: true,
        }
    }
}

/// Region and sector assigned to a tracked ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolProfile {
    pub symbol: String,
    pub region: String,
    pub sector: String,
}

impl SymbolProfile {
    pub fn new(symbol: &str, region: &str, sector: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            region: region.to_string(),
            sector: sector.to_string(),
        }
    }
}

/// Exposure analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisSettings {
    /// Region whose exposure is measured
    pub region: String,

    /// Sector whose exposure is measured
    pub sector: String,

    /// Assets under management reported alongside the metric
    pub total_aum: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            region: "Asia".to_string(),
            sector: "technology".to_string(),
            total_aum: 1_000_000.0,
        }
    }
}

/// Fan-out and aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct OrchestratorSettings {
    /// Per-subtask timeout in milliseconds, keyed by subtask name
    pub subtask_timeouts_ms: BTreeMap<String, u64>,

    /// Timeout for the synthesis call in milliseconds
    pub synthesis_timeout_ms: u64,

    /// Number of passages requested from the retrieval service
    pub top_k: usize,

    /// Tickers fetched for every brief
    pub symbols: Vec<SymbolProfile>,

    /// Subtasks whose output feeds the synthesis prompt
    pub context_sources: Vec<String>,

    /// Exposure analysis settings
    pub analysis: AnalysisSettings,

    /// Optional Handlebars template replacing the built-in synthesis prompt
    pub prompt_template: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let subtask_timeouts_ms = BTreeMap::from([
            ("market_data".to_string(), 5_000),
            ("retrieval".to_string(), 3_000),
            ("analysis".to_string(), 5_000),
        ]);

        Self {
            subtask_timeouts_ms,
            synthesis_timeout_ms: 30_000,
            top_k: 3,
            symbols: vec![
                SymbolProfile::new("TSM", "Asia", "technology"),
                SymbolProfile::new("005930.KS", "Asia", "technology"),
            ],
            context_sources: vec!["retrieval".to_string(), "market_data".to_string()],
            analysis: AnalysisSettings::default(),
            prompt_template: None,
        }
    }
}

impl OrchestratorSettings {
    /// Configured timeout for a subtask, if any.
    pub fn subtask_timeout(&self, name: &str) -> Option<Duration> {
        self.subtask_timeouts_ms
            .get(name)
            .map(|ms| Duration::from_millis(*ms))
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

/// Market-data collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketDataSettings {
    /// Base URL of the chart API
    pub endpoint: String,

    /// Retries per symbol after the first attempt
    pub max_retries: u32,
}

impl Default for MarketDataSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://query1.finance.yahoo.com".to_string(),
            max_retries: 2,
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    llm: Option<LlmSettings>,
    embedding: Option<EmbeddingConfig>,
    index: Option<IndexSettings>,
    orchestrator: Option<OrchestratorSettings>,
    market_data: Option<MarketDataSettings>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    format: Option<LogFormat>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(AppError::Config(format!("Unknown log format: {}", other))),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            verbose: false,
            no_color: false,
            log_format: LogFormat::default(),
            llm: LlmSettings::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            market_data: MarketDataSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and environment variables.
    ///
    /// Environment variables:
    /// - `BRIEF_WORKSPACE`: Override workspace path
    /// - `BRIEF_CONFIG`: Path to config file
    /// - `BRIEF_LLM_PROVIDER`, `BRIEF_LLM_MODEL`, `BRIEF_LLM_ENDPOINT`
    /// - `BRIEF_EMBEDDING_PROVIDER`
    /// - `BRIEF_MARKET_DATA_ENDPOINT`
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    /// - `BRIEF_LOG_FORMAT`: `pretty` or `json`
    pub fn load() -> AppResult<Self> {
        Self::load_with(None, None)
    }

    /// Like [`AppConfig::load`], with the workspace and config file taken
    /// from the command line when given.
    pub fn load_with(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("BRIEF_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }
        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }

        if let Ok(config_file) = std::env::var("BRIEF_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }
        if let Some(config_file) = config_file {
            config.config_file = Some(config_file);
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.brief_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("BRIEF_LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("BRIEF_LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(endpoint) = std::env::var("BRIEF_LLM_ENDPOINT") {
            config.llm.endpoint = Some(endpoint);
        }
        if let Ok(provider) = std::env::var("BRIEF_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(endpoint) = std::env::var("BRIEF_MARKET_DATA_ENDPOINT") {
            config.market_data.endpoint = endpoint;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }
        if let Ok(format) = std::env::var("BRIEF_LOG_FORMAT") {
            config.log_format = format.parse()?;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;
        let mut result = self.clone();

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(format) = logging.format {
                result.log_format = format;
            }
        }

        if let Some(llm) = config_file.llm {
            result.llm = llm;
        }
        if let Some(embedding) = config_file.embedding {
            result.embedding = embedding;
        }
        if let Some(index) = config_file.index {
            result.index = index;
        }
        if let Some(orchestrator) = config_file.orchestrator {
            result.orchestrator = orchestrator;
        }
        if let Some(market_data) = config_file.market_data {
            result.market_data = market_data;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .brief directory.
    pub fn brief_dir(&self) -> PathBuf {
        self.workspace.join(".brief")
    }

    /// Ensure the .brief directory exists.
    pub fn ensure_brief_dir(&self) -> AppResult<()> {
        let brief_dir = self.brief_dir();
        if !brief_dir.exists() {
            std::fs::create_dir_all(&brief_dir).map_err(|e| {
                AppError::Config(format!("Failed to create .brief directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Resolved directory holding the persisted vector index.
    pub fn index_dir(&self) -> PathBuf {
        if self.index.path.is_absolute() {
            self.index.path.clone()
        } else {
            self.workspace.join(&self.index.path)
        }
    }

    /// Validate the merged configuration.
    pub fn validate(&self) -> AppResult<()> {
        let known_llm = ["ollama"];
        if !known_llm.contains(&self.llm.provider.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "Unknown LLM provider: {}. Supported: {}",
                self.llm.provider,
                known_llm.join(", ")
            )));
        }

        let known_embedding = ["trigram", "ollama"];
        if !known_embedding.contains(&self.embedding.provider.to_lowercase().as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding.provider,
                known_embedding.join(", ")
            )));
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "Embedding dimensions must be greater than zero".to_string(),
            ));
        }

        if let Some((name, _)) = self
            .orchestrator
            .subtask_timeouts_ms
            .iter()
            .find(|(_, ms)| **ms == 0)
        {
            return Err(AppError::Config(format!(
                "Timeout for subtask '{}' must be greater than zero",
                name
            )));
        }

        if self.orchestrator.synthesis_timeout_ms == 0 {
            return Err(AppError::Config(
                "Synthesis timeout must be greater than zero".to_string(),
            ));
        }

        if self.orchestrator.top_k == 0 {
            return Err(AppError::Config("topK must be greater than zero".to_string()));
        }

        Ok(())
    }
}
