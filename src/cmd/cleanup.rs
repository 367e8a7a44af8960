//! `trackfeed cleanup`: snapshot-store retention.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use tracing::{info, warn};

use trackfeed::config::FeedConfig;
use trackfeed::lock::RunningLock;
use trackfeed::marker::{ARCHIVE_TASK, CLEANUP_TASK, ReportMarker, task_name};
use trackfeed::store::SqliteSnapshotStore;

/// Remove snapshot reports taken at or before the last archived report minus
/// the retention period. Nothing is removed until the archive has run.
pub fn cmd_cleanup(config: &FeedConfig, keep_days: Option<u32>) -> Result<()> {
    let root = config.storage_root();
    let network = config.network();
    let _lock = RunningLock::acquire(root, network, CLEANUP_TASK)?;
    let task = task_name(CLEANUP_TASK, network);

    let Some(archived) = ReportMarker::new(root, network, ARCHIVE_TASK).load()? else {
        warn!(task = %task, "archive marker is empty, nothing removed");
        println!("Archive has not processed any report yet; nothing removed");
        return Ok(());
    };

    let days = config.snapshot_keep_days(keep_days);
    let threshold = archived.timestamp() - TimeDelta::days(days.into());

    let snapshot_path = config.snapshot_db_path();
    let snapshots = SqliteSnapshotStore::new(&snapshot_path).with_context(|| {
        format!("Failed to open snapshot store {}", snapshot_path.display())
    })?;
    let removed = snapshots.remove_older_than(threshold)?;

    info!(
        task = %task,
        archived = %archived,
        threshold = %threshold,
        removed = removed.len(),
        "snapshot cleanup finished"
    );
    println!(
        "Removed {} snapshot report(s) older than {} day(s) before {}",
        removed.len(),
        days,
        archived
    );
    Ok(())
}
