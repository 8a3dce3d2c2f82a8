//! Process-wide tracing setup: an `EnvFilter`-gated stdout layer (JSON or pretty) plus an
//! optional daily-rolling file layer, following the origin codebase's logger shape.

use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::OrchestratorConfig;

/// Holds the non-blocking file writer's guard; dropping it flushes pending log lines, so
/// callers must keep the returned value alive for the process lifetime.
pub struct LoggerGuard {
    _file_guard: Option<WorkerGuard>,
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("invalid log level: {level}"),
    }
}

/// Initializes the global tracing subscriber from `config`. Call once at process start.
pub fn init(config: &OrchestratorConfig) -> Result<LoggerGuard> {
    let default_level = parse_log_level(&config.log_level)?;
    let env_filter = EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

    type BaseSubscriber = Layered<EnvFilter, Registry>;

    let stdout_json = config.log_format == "json";
    let stdout_layer_json: Option<Box<dyn Layer<BaseSubscriber> + Send + Sync>> = stdout_json.then(|| {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(io::stdout)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        ) as Box<dyn Layer<BaseSubscriber> + Send + Sync>
    });
    let stdout_layer_pretty: Option<Box<dyn Layer<BaseSubscriber> + Send + Sync>> = (!stdout_json).then(|| {
        Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(io::stdout)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE),
        ) as Box<dyn Layer<BaseSubscriber> + Send + Sync>
    });

    let (file_layer, file_guard): (Option<Box<dyn Layer<BaseSubscriber> + Send + Sync>>, Option<WorkerGuard>) =
        if let Some(log_dir) = &config.log_dir {
            let file_appender = tracing_appender::rolling::daily(log_dir, "swarm-orchestrator.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer().json().with_writer(non_blocking_file).with_ansi(false);
            (Some(Box::new(layer) as Box<dyn Layer<BaseSubscriber> + Send + Sync>), Some(guard))
        } else {
            (None, None)
        };

    let combined_layer =
        Layer::and_then(Layer::and_then(file_layer, stdout_layer_json), stdout_layer_pretty);
    tracing_subscriber::registry().with(env_filter).with(combined_layer).init();

    tracing::info!(level = %config.log_level, format = %config.log_format, file_output = config.log_dir.is_some(), "logger initialized");
    Ok(LoggerGuard { _file_guard: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_level() {
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn accepts_every_documented_level() {
        for level in ["trace", "debug", "info", "warn", "error", "INFO"] {
            assert!(parse_log_level(level).is_ok());
        }
    }
}
