use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Initialize logging from the `[logging]` config section
///
/// - stderr in `pretty` or `json` format, so stdout carries only matrix output
/// - daily rotating `rowcast.log` under `log_dir` when `log_to_file` is set
/// - RUST_LOG overrides `level`
pub fn init_production_logging(
    logging: &LoggingConfig,
    level: &str,
    log_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = match logging.format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        _ => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_line_number(false)
            .boxed(),
    };

    let file_layer = match log_dir.filter(|_| logging.log_to_file) {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, &dir, "rowcast.log");
            Some(
                fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false) // No colors in log files
                    .with_target(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!(level = %level, format = %logging.format, "Logging initialized");
    Ok(())
}

/// Initialize simple logging for one-shot commands (stderr only)
pub fn init_simple_logging(level: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_line_number(false),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
