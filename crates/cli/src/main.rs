//! Market Brief CLI
//!
//! Main entry point for the brief command-line tool.
//! Answers market questions from indexed notes, live quotes and exposure
//! analysis, and manages the local retrieval index.

mod commands;

use clap::{Parser, Subcommand};
use brief_core::config::{AppConfig, LogFormat};
use brief_core::{logging, AppResult};
use commands::{AskCommand, IndexCommand};
use std::path::PathBuf;

/// Market Brief - morning market briefs from local notes and live quotes
#[derive(Parser, Debug)]
#[command(name = "brief")]
#[command(about = "Morning market briefs from local notes and live quotes", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "BRIEF_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "BRIEF_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask for a market brief
    Ask(AskCommand),

    /// Manage the retrieval index
    Index(IndexCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load_with(cli.workspace.clone(), cli.config.clone())?;
    let mut config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.log_level,
        cli.verbose,
        cli.no_color,
    );

    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    logging::init_logging(
        config.log_level.as_deref(),
        config.no_color,
        config.log_format,
    )?;

    config.validate()?;

    tracing::info!("Market Brief CLI starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("LLM: {} ({})", config.llm.provider, config.llm.model);

    config.ensure_brief_dir()?;

    let command_name = match &cli.command {
        Commands::Ask(_) => "ask",
        Commands::Index(_) => "index",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Ask(cmd) => cmd.execute(&config).await,
        Commands::Index(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
