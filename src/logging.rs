//! Structured logging configuration
//!
//! Provides:
//! - JSON output for machine consumption
//! - Pretty or compact formatting for interactive use
//! - Daily rolling log files via `tracing-appender`
//! - `RUST_LOG` taking precedence over the configured level
//!
//! Console logs go to stderr so reports on stdout stay parseable.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const LOG_FILE_PREFIX: &str = "usage-ledger.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the global subscriber. The returned guard flushes the file
/// writer on drop and must be held until the process exits.
pub fn init_logging(config: &LoggingConfig, log_dir: &Path) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let format = config.format.to_lowercase();

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    match config.output.to_lowercase().as_str() {
        "file" => {
            let (writer, file_guard) = file_writer(log_dir)?;
            layers.push(file_layer(&format, writer));
            guard = Some(file_guard);
        }
        "both" => {
            let (writer, file_guard) = file_writer(log_dir)?;
            layers.push(console_layer(&format));
            layers.push(file_layer(&format, writer));
            guard = Some(file_guard);
        }
        _ => layers.push(console_layer(&format)),
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn file_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(file_appender))
}

fn console_layer(format: &str) -> BoxedLayer {
    match format {
        "json" => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        "compact" => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        _ => fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_span_events(FmtSpan::CLOSE)
            .pretty()
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_layer(format: &str, writer: NonBlocking) -> BoxedLayer {
    match format {
        "json" => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .boxed(),
        _ => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    }
}
