//! rowcast - distributed all-pairs shortest paths
//!
//! ## Commands
//! - `run` - relax a matrix file with an in-process group of P ranks
//! - `worker` - run one rank of a multi-process group through a relay
//! - `generate` - write a random weighted digraph as a matrix file
//! - `show` - print a matrix file
//! - `init-config` - write the default configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rowcast::{
    generate_matrix, init_production_logging, init_simple_logging, read_matrix, run_local,
    run_worker, write_matrix, Config, GatheredMatrix, RunOptions, RunOutcome,
};
use std::path::{Path, PathBuf};
use tracing::error;
use uuid::Uuid;

/// Distributed Floyd-Warshall over row-block partitioned matrices
#[derive(Parser, Debug)]
#[command(name = "rowcast")]
#[command(about = "Distributed all-pairs shortest paths", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.rowcast/agent.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Relax a matrix file with an in-process group
    Run {
        /// Matrix file: i32 rows, i32 cols, then row-major i32 data (little-endian)
        matrix: PathBuf,

        /// Number of ranks
        #[arg(short = 'n', long, default_value = "1")]
        processes: usize,

        /// Print only the timing line
        #[arg(short, long)]
        quiet: bool,
    },

    /// Run one rank of a multi-process group through a relay
    Worker {
        matrix: PathBuf,

        #[arg(long)]
        rank: usize,

        /// Number of ranks in the group
        #[arg(long)]
        size: usize,

        /// Session shared by every rank of the group
        #[arg(long)]
        session: Uuid,

        /// Relay address (host:port); overrides the config
        #[arg(short, long)]
        relay: Option<String>,

        #[arg(short, long)]
        quiet: bool,
    },

    /// Write a random weighted digraph as a matrix file
    Generate {
        output: PathBuf,

        /// Number of vertices
        #[arg(long)]
        order: usize,

        /// Probability that an off-diagonal edge exists
        #[arg(long, default_value = "0.3")]
        density: f64,

        #[arg(long, default_value = "100")]
        max_weight: i32,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Print a matrix file
    Show { matrix: PathBuf },

    /// Write the default configuration and exit
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = real_main().await {
        error!(error = %e, "rowcast failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn real_main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { force } => {
            init_simple_logging(cli.log_level.as_deref().unwrap_or("info"))?;
            cmd_init_config(cli.config, force)
        }

        Commands::Generate {
            output,
            order,
            density,
            max_weight,
            seed,
        } => {
            init_simple_logging(cli.log_level.as_deref().unwrap_or("warn"))?;
            cmd_generate(&output, order, density, max_weight, seed)
        }

        Commands::Show { matrix } => {
            // No logging for show (pure display)
            cmd_show(&matrix)
        }

        Commands::Run {
            matrix,
            processes,
            quiet,
        } => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config, cli.log_level.as_deref())?;

            let outcome = run_local(&matrix, processes, run_options(&config, quiet))
                .await
                .with_context(|| format!("Failed to relax {}", matrix.display()))?;
            print_outcome(&outcome);
            Ok(())
        }

        Commands::Worker {
            matrix,
            rank,
            size,
            session,
            relay,
            quiet,
        } => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config, cli.log_level.as_deref())?;

            let relay_addr = relay.unwrap_or_else(|| config.group.relay_addr.clone());
            let outcome = run_worker(
                &relay_addr,
                session,
                rank,
                size,
                config.rendezvous_timeout(),
                matrix.clone(),
                run_options(&config, quiet),
            )
            .await
            .with_context(|| format!("Rank {} failed on {}", rank, matrix.display()))?;
            print_outcome(&outcome);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load_or_default(path).with_context(|| match path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load default config".to_string(),
    })
}

fn init_logging(config: &Config, level_override: Option<&str>) -> Result<()> {
    let level = level_override.unwrap_or(&config.logging.level);
    init_production_logging(&config.logging, level, Some(config.log_dir()))
}

fn run_options(config: &Config, quiet: bool) -> RunOptions {
    RunOptions {
        gather_initial: !quiet && config.output.print_initial,
        gather_result: !quiet && config.output.print_matrix,
    }
}

/// Print whatever the coordinator collected. Other ranks print nothing.
fn print_outcome(outcome: &RunOutcome) {
    if let Some(initial) = &outcome.initial {
        println!("Initial matrix:\n{}", initial);
    }
    if let Some(result) = &outcome.result {
        println!("Shortest paths:\n{}", result);
    }
    if let Some(timing) = &outcome.timing {
        println!("{}", timing);
    }
}

fn cmd_generate(output: &Path, order: usize, density: f64, max_weight: i32, seed: u64) -> Result<()> {
    let data = generate_matrix(order, density, max_weight, seed)?;
    write_matrix(output, order, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Wrote {}x{} matrix to {}", order, order, output.display());
    Ok(())
}

fn cmd_show(path: &Path) -> Result<()> {
    let (header, data) =
        read_matrix(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let order = header.square_order()?;
    print!("{}", GatheredMatrix::new(order, data)?);
    Ok(())
}

fn cmd_init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    Config::default()
        .save(&path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
