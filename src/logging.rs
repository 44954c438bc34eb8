//! Tracing subscriber setup for the `boardsync` binary.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

const LOG_FILE_PREFIX: &str = "boardsync.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Default filter when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "boardsync=debug" } else { "boardsync=info" }
}

/// Install the global subscriber. Logs go to stderr and, when `log_dir` is
/// set, to a daily-rolling file in that directory. Keep the returned guard
/// alive for the life of the program or buffered file output is lost.
pub fn init_tracing(
    verbose: bool,
    format: LogFormat,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(verbose)))
        .context("Invalid log filter")?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(stderr_layer(format));

    let mut guard = None;
    if let Some(dir) = log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        let file_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
            LogFormat::Plain => Box::new(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            ),
            LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json().with_writer(writer)),
        };
        layers.push(file_layer);
        guard = Some(worker_guard);
    }
    layers.push(Box::new(filter));

    Registry::default()
        .with(layers)
        .try_init()
        .context("Tracing subscriber already installed")?;
    Ok(guard)
}

fn stderr_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Plain => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(false),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_current_span(true),
        ),
    }
}
