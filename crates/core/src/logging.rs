//! Tracing subscriber setup.
//!
//! Everything is logged to stderr; stdout carries the brief or the JSON
//! response only.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogFormat;
use crate::error::{AppError, AppResult};

const DEFAULT_FILTER: &str = "info";

/// Build the filter from an explicit directive, falling back to `RUST_LOG`
/// and then `info`.
fn build_filter(directive: Option<&str>) -> AppResult<EnvFilter> {
    let directive = match directive {
        Some(d) => d.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };
    EnvFilter::try_new(&directive)
        .map_err(|e| AppError::Config(format!("Invalid log filter '{}': {}", directive, e)))
}

/// Install the global subscriber. Fails if one is already installed.
///
/// ```no_run
/// use brief_core::config::LogFormat;
/// use brief_core::logging::init_logging;
///
/// init_logging(Some("brief_orchestrator=debug"), false, LogFormat::Pretty)?;
/// # Ok::<(), brief_core::AppError>(())
/// ```
pub fn init_logging(log_level: Option<&str>, no_color: bool, format: LogFormat) -> AppResult<()> {
    let filter = build_filter(log_level)?;

    let layer = match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(!no_color)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to init logging: {}", e)))
}
