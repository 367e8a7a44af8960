//! `trackfeed compact`: write, inspect and clean up compact report files.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use tracing::{info, warn};

use trackfeed::compact::{CompactStorage, save_next};
use trackfeed::config::FeedConfig;
use trackfeed::lock::RunningLock;
use trackfeed::marker::{CLEANUP_COMPACT_TASK, ReportMarker, SAVE_COMPACT_TASK, task_name};
use trackfeed::model::{Position, ReportId};
use trackfeed::store::SqliteSnapshotStore;

use super::{BUSY_SLEEP, blocking, sleep_or_interrupt};

pub async fn cmd_compact_save(config: &FeedConfig, once: bool) -> Result<()> {
    let root = config.storage_root();
    let network = config.network();
    let _lock = RunningLock::acquire(root, network, SAVE_COMPACT_TASK)?;
    let marker = ReportMarker::new(root, network, SAVE_COMPACT_TASK);
    let keep_days = config.keep_days(None);

    let snapshot_path = config.snapshot_db_path();
    let snapshots = Arc::new(SqliteSnapshotStore::new(&snapshot_path).with_context(|| {
        format!("Failed to open snapshot store {}", snapshot_path.display())
    })?);
    let storage = Arc::new(CompactStorage::open(root, network)?);

    let task = task_name(SAVE_COMPACT_TASK, network);
    info!(
        task = %task,
        root = %root.display(),
        keep_days,
        once,
        "compact save started"
    );

    let mut saved = 0usize;
    loop {
        let last = marker.load()?;
        let result = {
            let snapshots = snapshots.clone();
            let storage = storage.clone();
            let last = last.clone();
            blocking(move || save_next(&snapshots, &storage, last.as_ref(), keep_days)).await?
        };

        let sleep = match result {
            Ok(Some(report)) => {
                marker.save(&report)?;
                saved += 1;
                BUSY_SLEEP
            }
            Ok(None) => {
                if once {
                    break;
                }
                config.idle_sleep()
            }
            Err(e) => {
                if once {
                    return Err(e).context("Compact save failed");
                }
                warn!(task = %task, last = ?last, error = %e, "compact save failed, will retry");
                config.idle_sleep()
            }
        };

        if once {
            continue;
        }
        if !sleep_or_interrupt(sleep).await {
            break;
        }
    }

    info!(task = %task, saved, "compact save finished");
    Ok(())
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

fn print_positions(report: &ReportId, positions: &[&Position]) {
    println!();
    println!(
        "{} {}",
        console::style("Report").bold(),
        console::style(report).cyan()
    );
    println!();
    println!(
        "{}",
        console::style(format!(
            "{:>8}  {:<10} {:>10} {:>11} {:>6} {:>4} {:>4} {:>5} {:<3} {:<6} {:<4} {:<4}",
            "pilot", "callsign", "lat", "lon", "alt", "gs", "hdg", "qnh", "gnd", "type", "from", "to"
        ))
        .dim()
    );
    for p in positions {
        println!(
            "{:>8}  {:<10} {:>10.4} {:>11.4} {:>6} {:>4} {:>4} {:>5} {:<3} {:<6} {:<4} {:<4}",
            p.pilot_number,
            p.callsign,
            p.latitude,
            p.longitude,
            p.altitude,
            p.groundspeed,
            p.heading,
            p.qnh_mb,
            if p.on_ground { "yes" } else { "no" },
            opt(&p.fp_aircraft),
            opt(&p.fp_origin),
            opt(&p.fp_destination),
        );
    }
    println!();
    println!("{} positions", positions.len());
}

pub fn cmd_compact_show(config: &FeedConfig, report: &str, json: bool) -> Result<()> {
    let report = ReportId::parse(report)?;
    let storage = CompactStorage::open(config.storage_root(), config.network())?;
    let samples = storage
        .load(&report)
        .with_context(|| format!("Failed to load compact report {}", report))?;
    let positions: Vec<&Position> = samples.iter().map(|s| &s.position).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&positions)?);
    } else {
        print_positions(&report, &positions);
    }
    Ok(())
}

pub fn cmd_compact_cleanup(config: &FeedConfig, keep_days: Option<u32>) -> Result<()> {
    let root = config.storage_root();
    let network = config.network();
    let _lock = RunningLock::acquire(root, network, CLEANUP_COMPACT_TASK)?;

    let days = config.keep_days(keep_days);
    let threshold = Utc::now() - TimeDelta::days(days.into());
    let storage = CompactStorage::open(root, network)?;
    let removed = storage.remove_older_than(threshold)?;

    info!(
        task = %task_name(CLEANUP_COMPACT_TASK, network),
        removed = removed.len(),
        threshold = %threshold,
        "compact cleanup finished"
    );
    println!(
        "Removed {} compact file(s) older than {} day(s)",
        removed.len(),
        days
    );
    Ok(())
}
