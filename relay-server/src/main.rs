use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use rowcast_relay::{serve, Config, RelayError, Result};

/// rowcast relay - joins worker ranks into process groups
#[derive(Parser, Debug)]
#[command(name = "rowcast-relay")]
#[command(about = "Session relay for multi-process rowcast groups")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.rowcast/relay.toml")]
    config: String,

    /// Override listen port (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Generate default config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = PathBuf::from(shellexpand::tilde(&cli.config).into_owned());

    if cli.generate_config {
        Config::default().save(&config_path)?;
        println!("Generated default configuration at: {}", config_path.display());
        println!("\nStart the relay with:");
        println!("  rowcast-relay --config {}", cli.config);
        return Ok(());
    }

    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    if let Some(port) = cli.port {
        config.override_port(port)?;
    }

    setup_logging(&config, cli.log_level.as_deref())?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting rowcast relay");
    tracing::info!(
        max_sessions = config.relay.max_sessions,
        max_group_size = config.relay.max_group_size,
        handshake_timeout_secs = config.relay.handshake_timeout_secs,
        "Relay configuration"
    );

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RelayError::Network(format!("Failed to listen on {}: {}", addr, e)))?;

    println!("rowcast relay listening on {}", listener.local_addr()?);
    println!("Press Ctrl+C to stop\n");

    serve(listener, config.relay.clone(), async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        tracing::info!("Received shutdown signal (Ctrl+C)");
    })
    .await?;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(config: &Config, log_level_override: Option<&str>) -> Result<()> {
    let log_level = log_level_override.unwrap_or(&config.logging.level);
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let console = if config.logging.log_format == "json" {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().pretty().boxed()
    };

    let file = if config.logging.log_to_file {
        let path = PathBuf::from(shellexpand::tilde(&config.logging.log_file_path).into_owned());
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "relay.log".to_string());
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);
        Some(fmt::layer().with_writer(appender).with_ansi(false))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter)
        .try_init()?;

    Ok(())
}
