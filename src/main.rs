use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use trackfeed::config::{DEFAULT_CONFIG_FILE, FeedConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "trackfeed")]
#[command(version, about = "Flight-tracking datafeeder: track compaction and archival")]
pub struct Cli {
    /// Path to trackfeed.toml
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Debug-level logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compact live tracks and archive their checkpoints
    Archive {
        /// Process pending reports, then exit instead of polling
        #[arg(long)]
        once: bool,
    },
    /// Write, inspect or clean up compact report files
    Compact {
        #[command(subcommand)]
        command: CompactCommands,
    },
    /// Delete snapshot reports already covered by the archive
    Cleanup {
        /// Override [snapshots] keep_days
        #[arg(long)]
        keep_days: Option<u32>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show markers, compact files and archive counts
    Status,
}

#[derive(Subcommand, Clone)]
pub enum CompactCommands {
    /// Save snapshot reports as compact files
    Save {
        /// Process pending reports, then exit instead of polling
        #[arg(long)]
        once: bool,
    },
    /// Decode and print one compact file
    Show {
        /// Report id (yyyyMMddHHmmss)
        report: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete compact files older than the retention period
    Cleanup {
        /// Override [compact] keep_days
        #[arg(long)]
        keep_days: Option<u32>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
    Init,
}

/// Install the global subscriber. The returned guard flushes the log file
/// on drop and must live as long as the process.
fn init_logging(verbose: bool, json: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "trackfeed.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::Config { command } = &cli.command {
        let _guard = init_logging(cli.verbose, cli.log_json, None)?;
        return cmd::cmd_config(&cli.config, command.clone());
    }

    let config = FeedConfig::load(&cli.config)?.with_verbose(cli.verbose);
    let _guard = init_logging(cli.verbose, cli.log_json, config.log_dir())?;
    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }

    match &cli.command {
        Commands::Archive { once } => cmd::cmd_archive(&config, *once).await?,
        Commands::Compact { command } => match command {
            CompactCommands::Save { once } => cmd::cmd_compact_save(&config, *once).await?,
            CompactCommands::Show { report, json } => cmd::cmd_compact_show(&config, report, *json)?,
            CompactCommands::Cleanup { keep_days } => cmd::cmd_compact_cleanup(&config, *keep_days)?,
        },
        Commands::Cleanup { keep_days } => cmd::cmd_cleanup(&config, *keep_days)?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
