//! `trackfeed status`: markers, compact file range and store row counts.

use anyhow::Result;

use trackfeed::compact::CompactStorage;
use trackfeed::config::FeedConfig;
use trackfeed::marker::{ARCHIVE_TASK, ReportMarker, SAVE_COMPACT_TASK, task_name};
use trackfeed::store::{SqliteArchiveStore, SqliteSnapshotStore};

fn or_none<T: std::fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

pub fn cmd_status(config: &FeedConfig) -> Result<()> {
    let root = config.storage_root();
    let network = config.network();

    println!();
    println!("{}", console::style("Trackfeed Status").bold().cyan());
    println!();
    println!("Network:      {}", network);
    println!("Storage root: {}", root.display());
    println!();

    println!("{}", console::style("Markers").bold());
    for task in [ARCHIVE_TASK, SAVE_COMPACT_TASK] {
        let marker = ReportMarker::new(root, network, task);
        let last = match marker.load() {
            Ok(last) => or_none(last),
            Err(e) => console::style(format!("unreadable ({})", e)).red().to_string(),
        };
        println!("  {:<16} {}", task_name(task, network), last);
    }
    println!();

    println!("{}", console::style("Compact files").bold());
    let storage = CompactStorage::open(root, network)?;
    let reports = storage.list_reports()?;
    println!("  count: {}", reports.len());
    println!("  first: {}", or_none(reports.first()));
    println!("  last:  {}", or_none(reports.last()));
    println!();

    println!("{}", console::style("Snapshot store").bold());
    let snapshot_path = config.snapshot_db_path();
    if snapshot_path.exists() {
        let snapshots = SqliteSnapshotStore::new(&snapshot_path)?;
        println!("  reports: {}", snapshots.report_count()?);
        println!("  last:    {}", or_none(snapshots.last_report()?.map(|r| r.id)));
    } else {
        println!("  {}", console::style("not created yet").dim());
    }
    println!();

    println!("{}", console::style("Archive store").bold());
    let archive_path = config.archive_db_path();
    if archive_path.exists() {
        let counts = SqliteArchiveStore::new(&archive_path)?.counts()?;
        println!("  reports:   {}", counts.reports);
        println!("  positions: {}", counts.positions);
        println!("  remarks:   {}", counts.remarks);
    } else {
        println!("  {}", console::style("not created yet").dim());
    }
    println!();

    Ok(())
}
