//! Index command handler.
//!
//! Manages the persisted retrieval index: ingest notes, search, inspect,
//! flush and reset.

use brief_core::{config::AppConfig, AppError, AppResult};
use brief_retrieval::text::{clean_text, parse_metadata_value};
use brief_retrieval::{
    create_provider, ChunkMetadata, MetadataValue, RetrievalService, WebFetcher,
    DEFAULT_MARKET_NOTES,
};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions picked up when ingesting a directory
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Manage the retrieval index
#[derive(Args, Debug)]
pub struct IndexCommand {
    #[command(subcommand)]
    pub action: IndexAction,
}

#[derive(Subcommand, Debug)]
pub enum IndexAction {
    /// Add text passages, files and web pages to the index
    Ingest(IndexIngestCommand),
    /// Search the index
    Search(IndexSearchCommand),
    /// Show index statistics
    Stats(IndexStatsCommand),
    /// Write the index to disk
    Flush,
    /// Remove every chunk from the index
    Reset,
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let service = open_service(config)?;

        match &self.action {
            IndexAction::Ingest(cmd) => cmd.execute(&service).await,
            IndexAction::Search(cmd) => cmd.execute(&service).await,
            IndexAction::Stats(cmd) => cmd.execute(&service).await,
            IndexAction::Flush => {
                service.flush().await?;
                println!("Index flushed to {}", config.index_dir().display());
                Ok(())
            }
            IndexAction::Reset => {
                service.reset().await?;
                println!("Index reset");
                Ok(())
            }
        }
    }
}

fn open_service(config: &AppConfig) -> AppResult<RetrievalService> {
    let embedder = create_provider(&config.embedding)?;
    RetrievalService::open(&config.index_dir(), &config.index, embedder)
}

/// Add passages to the index
#[derive(Args, Debug)]
pub struct IndexIngestCommand {
    /// Passage text (repeatable)
    #[arg(long)]
    pub text: Vec<String>,

    /// File or directory to read passages from (repeatable)
    #[arg(long)]
    pub path: Vec<PathBuf>,

    /// Web page to ingest as one passage (repeatable)
    #[arg(long)]
    pub url: Vec<String>,

    /// Tag whose text is taken from each web page
    #[arg(long, default_value = "body")]
    pub selector: String,

    /// Also ingest the built-in market notes
    #[arg(long)]
    pub seed: bool,

    /// Strip special characters from every passage
    #[arg(long)]
    pub clean: bool,

    /// Source label stored with every passage
    #[arg(long)]
    pub source: Option<String>,

    /// Ticker symbol stored with every passage
    #[arg(long)]
    pub symbol: Option<String>,

    /// Date stored with every passage
    #[arg(long)]
    pub date: Option<String>,

    /// Extra KEY=VALUE metadata; numbers such as 42 or $1.2B are typed
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub meta: Vec<(String, String)>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexIngestCommand {
    pub async fn execute(&self, service: &RetrievalService) -> AppResult<()> {
        tracing::info!("Executing index ingest command");

        let base = self.base_metadata();
        let mut texts = Vec::new();
        let mut metadata = Vec::new();

        for text in &self.text {
            texts.push(text.clone());
            metadata.push(base.clone());
        }

        for path in &self.path {
            for (file, passage) in collect_passages(path)? {
                let mut entry = base.clone();
                entry.insert(
                    "path".to_string(),
                    MetadataValue::from(file.display().to_string()),
                );
                texts.push(passage);
                metadata.push(entry);
            }
        }

        let mut fetch_failures = 0;
        if !self.url.is_empty() {
            let fetcher = WebFetcher::new()?;
            for result in fetcher.fetch_all(&self.url, &self.selector).await {
                match result {
                    Ok(page) => {
                        let mut entry = base.clone();
                        entry.extend(page.metadata());
                        texts.push(page.text);
                        metadata.push(entry);
                    }
                    Err(e) => {
                        tracing::warn!("{}", e);
                        eprintln!("Skipped: {}", e);
                        fetch_failures += 1;
                    }
                }
            }
        }

        if self.seed {
            for note in DEFAULT_MARKET_NOTES {
                texts.push(note.to_string());
                metadata.push(base.clone());
            }
        }

        if self.clean {
            for text in texts.iter_mut() {
                *text = clean_text(text);
            }
        }

        if texts.is_empty() {
            let hint = if fetch_failures > 0 {
                "every URL failed"
            } else {
                "pass --text, --path, --url or --seed"
            };
            return Err(AppError::InvalidRequest(format!(
                "Nothing to ingest; {}",
                hint
            )));
        }

        let report = service.ingest(texts, metadata).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("Ingested {} passages", report.ingested);
            for failure in &report.failures {
                println!("- item {} skipped: {}", failure.index, failure.error);
            }
        }

        Ok(())
    }

    fn base_metadata(&self) -> ChunkMetadata {
        let mut metadata = ChunkMetadata::new();
        if let Some(source) = &self.source {
            metadata.insert("source".to_string(), source.as_str().into());
        }
        if let Some(symbol) = &self.symbol {
            metadata.insert("symbol".to_string(), symbol.as_str().into());
        }
        if let Some(date) = &self.date {
            metadata.insert("date".to_string(), date.as_str().into());
        }
        for (key, value) in &self.meta {
            metadata.insert(key.clone(), parse_metadata_value(value));
        }
        metadata
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

/// Read passages from a file, or from every text file under a directory.
///
/// Passages are separated by blank lines.
fn collect_passages(path: &Path) -> AppResult<Vec<(PathBuf, String)>> {
    if !path.exists() {
        return Err(AppError::InvalidRequest(format!(
            "Path does not exist: {}",
            path.display()
        )));
    }

    let mut passages = Vec::new();
    for entry in WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
    {
        let entry =
            entry.map_err(|e| AppError::Other(format!("Failed to walk {}: {}", path.display(), e)))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
            .unwrap_or(false);
        // Explicitly named files are read whatever their extension
        if entry.depth() > 0 && !is_text {
            continue;
        }

        let contents = std::fs::read_to_string(entry.path())?;
        for passage in split_passages(&contents) {
            passages.push((entry.path().to_path_buf(), passage));
        }
    }

    tracing::debug!("Collected {} passages from {}", passages.len(), path.display());
    Ok(passages)
}

fn split_passages(contents: &str) -> Vec<String> {
    let mut passages = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                passages.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        passages.push(current.join(" "));
    }

    passages
}

/// Search the index
#[derive(Args, Debug)]
pub struct IndexSearchCommand {
    /// Query text
    pub query: String,

    /// Number of passages to return
    #[arg(short = 'k', long, default_value = "3")]
    pub top_k: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexSearchCommand {
    pub async fn execute(&self, service: &RetrievalService) -> AppResult<()> {
        tracing::info!("Executing index search command");

        let hits = service.search(&self.query, self.top_k).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
        } else if hits.is_empty() {
            println!("No matching passages");
        } else {
            for hit in &hits {
                println!("{:.3}  {}", hit.score, hit.text);
            }
        }

        Ok(())
    }
}

/// Show index statistics
#[derive(Args, Debug)]
pub struct IndexStatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexStatsCommand {
    pub async fn execute(&self, service: &RetrievalService) -> AppResult<()> {
        let stats = service.stats().await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
        } else {
            println!("Chunks:    {}", stats.chunks);
            println!("Dimension: {}", stats.dimension);
            if let Some(dir) = &stats.index_dir {
                println!("Directory: {}", dir.display());
            }
            println!("Persisted: {}", if stats.persisted { "yes" } else { "no" });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brief_retrieval::embeddings::providers::TrigramProvider;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_split_passages() {
        let contents = "TSMC beat earnings\nestimates this quarter.\n\n\n  Samsung gave mixed guidance.  \n";
        assert_eq!(
            split_passages(contents),
            vec![
                "TSMC beat earnings estimates this quarter.".to_string(),
                "Samsung gave mixed guidance.".to_string(),
            ]
        );
        assert!(split_passages("\n \n").is_empty());
    }

    #[test]
    fn test_collect_passages_from_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.md"), "First note.\n\nSecond note.").unwrap();
        std::fs::write(temp.path().join("b.txt"), "Third note.").unwrap();
        std::fs::write(temp.path().join("data.bin"), "ignored").unwrap();
        std::fs::create_dir(temp.path().join(".hidden")).unwrap();
        std::fs::write(temp.path().join(".hidden/c.md"), "Hidden note.").unwrap();

        let passages = collect_passages(temp.path()).unwrap();
        let texts: Vec<_> = passages.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["First note.", "Second note.", "Third note."]);
    }

    #[test]
    fn test_collect_passages_missing_path() {
        assert!(matches!(
            collect_passages(Path::new("/no/such/notes")),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_base_metadata() {
        let cmd = IndexIngestCommand {
            source: Some("earnings_call".to_string()),
            symbol: Some("TSM".to_string()),
            meta: vec![
                ("market_cap".to_string(), "$1.2B".to_string()),
                ("quarter".to_string(), "3".to_string()),
            ],
            ..ingest_command()
        };

        let metadata = cmd.base_metadata();
        assert_eq!(metadata.len(), 4);
        assert_eq!(metadata["symbol"], MetadataValue::from("TSM"));
        assert_eq!(metadata["market_cap"], MetadataValue::Float(1.2e9));
        assert_eq!(metadata["quarter"], MetadataValue::Integer(3));
    }

    fn ingest_command() -> IndexIngestCommand {
        IndexIngestCommand {
            text: Vec::new(),
            path: Vec::new(),
            url: Vec::new(),
            selector: "body".to_string(),
            seed: false,
            clean: false,
            source: None,
            symbol: None,
            date: None,
            meta: Vec::new(),
            json: false,
        }
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("region=Asia=Pacific"),
            Ok(("region".to_string(), "Asia=Pacific".to_string()))
        );
        assert!(parse_key_value("no-separator").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[tokio::test]
    async fn test_seed_and_clean() {
        let service = RetrievalService::in_memory(Arc::new(TrigramProvider::new(256)));

        let cmd = IndexIngestCommand {
            text: vec!["Won/dollar: 1,380 (+0.4%)".to_string()],
            seed: true,
            clean: true,
            ..ingest_command()
        };
        cmd.execute(&service).await.unwrap();
        assert_eq!(service.stats().await.chunks, 1 + DEFAULT_MARKET_NOTES.len());

        let hits = service.search("TSMC earnings beat", 1).await.unwrap();
        assert_eq!(hits[0].text, DEFAULT_MARKET_NOTES[2]);
        let hits = service.search("Wondollar", 1).await.unwrap();
        assert_eq!(hits[0].text, "Wondollar 1,380 0.4");
    }

    #[tokio::test]
    async fn test_nothing_to_ingest() {
        let service = RetrievalService::in_memory(Arc::new(TrigramProvider::new(256)));

        assert!(matches!(
            ingest_command().execute(&service).await,
            Err(AppError::InvalidRequest(_))
        ));
    }
}
