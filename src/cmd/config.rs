//! `trackfeed config`: view, validate and initialise configuration.

use std::path::Path;

use anyhow::Result;

use super::super::ConfigCommands;

fn print_toml(toml: &trackfeed::config::FeedToml) {
    println!("[storage]");
    println!("  root = \"{}\"", toml.storage.root.display());
    println!("  network = \"{}\"", toml.storage.network);
    println!();
    println!("[archive]");
    println!(
        "  checkpoint_period_minutes = {}",
        toml.archive.checkpoint_period_minutes
    );
    println!("  stale_after_minutes = {}", toml.archive.stale_after_minutes);
    println!("  backfill_reports = {}", toml.archive.backfill_reports);
    println!("  idle_sleep_secs = {}", toml.archive.idle_sleep_secs);
    println!();
    println!("[cache]");
    println!("  reports_capacity = {}", toml.cache.reports_capacity);
    println!("  remarks_capacity = {}", toml.cache.remarks_capacity);
    println!("  idle_minutes = {}", toml.cache.idle_minutes);
    println!();
    println!("[compact]");
    println!("  keep_days = {}", toml.compact.keep_days);
    println!();
    println!("[snapshots]");
    println!("  keep_days = {}", toml.snapshots.keep_days);
    if let Some(dir) = &toml.logging.dir {
        println!();
        println!("[logging]");
        println!("  dir = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(config_path: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use trackfeed::config::{FeedConfig, FeedToml};

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Trackfeed Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_toml(&FeedToml::load(config_path)?);
            } else {
                println!("No config file found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                print_toml(&FeedToml::default());
                println!("Run 'trackfeed config init' to create a trackfeed.toml file.");
                println!();
            }

            // Effective values include TRACKFEED_* environment overrides.
            let config = FeedConfig::load(config_path)?;
            println!("Effective values (with env overrides):");
            println!("  storage root = \"{}\"", config.storage_root().display());
            println!("  network = \"{}\"", config.network());
            println!("  keep_days = {}", config.keep_days(None));
            println!("  snapshot keep_days = {}", config.snapshot_keep_days(None));
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No trackfeed.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = FeedToml::load(config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("Config already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            FeedToml::default().save(config_path)?;

            println!("Created trackfeed.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [storage] root, network");
            println!("  - [archive] checkpoint_period_minutes, stale_after_minutes, backfill_reports");
            println!("  - [compact] keep_days");
            println!("  - [snapshots] keep_days");
            println!();
        }
    }

    Ok(())
}
