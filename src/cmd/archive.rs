//! `trackfeed archive`: the compaction loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use trackfeed::archive::{ArchiveWriter, Compactor, CycleStats};
use trackfeed::config::FeedConfig;
use trackfeed::errors::{CompactionError, StoreError};
use trackfeed::lock::RunningLock;
use trackfeed::marker::{ARCHIVE_TASK, ReportMarker, task_name};
use trackfeed::model::ReportId;
use trackfeed::store::{SqliteArchiveStore, SqliteSnapshotStore};

use super::{BUSY_SLEEP, blocking, sleep_or_interrupt};

type SqliteCompactor = Compactor<SqliteSnapshotStore, SqliteArchiveStore>;

/// Runs compaction cycles on tokio's blocking pool. The compactor keeps the
/// live tracks between cycles, so one instance lives for the whole loop.
#[derive(Clone)]
struct CompactorHandle {
    inner: Arc<std::sync::Mutex<SqliteCompactor>>,
}

impl CompactorHandle {
    fn new(compactor: SqliteCompactor) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(compactor)),
        }
    }

    async fn process_next(
        &self,
        last: Option<ReportId>,
    ) -> Result<Result<Option<CycleStats>, CompactionError>> {
        let compactor = self.inner.clone();
        blocking(move || {
            let mut guard = compactor
                .lock()
                .map_err(|_| CompactionError::from(StoreError::LockPoisoned))?;
            guard.process_next(last.as_ref())
        })
        .await
    }
}

pub async fn cmd_archive(config: &FeedConfig, once: bool) -> Result<()> {
    let root = config.storage_root();
    let network = config.network();
    let _lock = RunningLock::acquire(root, network, ARCHIVE_TASK)?;
    let marker = ReportMarker::new(root, network, ARCHIVE_TASK);

    let snapshot_path = config.snapshot_db_path();
    let snapshots = SqliteSnapshotStore::new(&snapshot_path).with_context(|| {
        format!("Failed to open snapshot store {}", snapshot_path.display())
    })?;
    let archive_path = config.archive_db_path();
    let archive = SqliteArchiveStore::new(&archive_path)
        .with_context(|| format!("Failed to open archive store {}", archive_path.display()))?;

    let writer = ArchiveWriter::new(archive, &config.cache_settings());
    let compactor = CompactorHandle::new(Compactor::new(
        snapshots,
        writer,
        config.track_settings(),
    ));

    let task = task_name(ARCHIVE_TASK, network);
    info!(
        task = %task,
        root = %root.display(),
        once,
        "archive started"
    );

    let mut processed = 0usize;
    loop {
        let last = marker.load()?;
        let sleep = match compactor.process_next(last.clone()).await? {
            Ok(Some(stats)) => {
                marker.save(&stats.report)?;
                processed += 1;
                BUSY_SLEEP
            }
            Ok(None) => {
                if once {
                    break;
                }
                config.idle_sleep()
            }
            Err(e) if e.is_retryable() => {
                if once {
                    return Err(e).context("Archive cycle failed");
                }
                warn!(task = %task, last = ?last, error = %e, "archive cycle failed, will retry");
                config.idle_sleep()
            }
            Err(e) => {
                error!(task = %task, last = ?last, error = %e, "archive stopped");
                return Err(e).context("Archive stopped on corrupted track state");
            }
        };

        if once {
            continue;
        }
        if !sleep_or_interrupt(sleep).await {
            break;
        }
    }

    info!(task = %task, processed, "archive finished");
    Ok(())
}
