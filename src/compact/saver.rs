//! Copies snapshot reports into compact files, one report per call.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use super::CompactStorage;
use crate::errors::StoreError;
use crate::model::{Report, ReportId};
use crate::store::SnapshotStore;

/// The report to save after `last`. Without a marker, start at the first
/// report newer than `now - keep_days` so a fresh installation does not
/// rewrite the whole snapshot history.
pub fn pending_report<S: SnapshotStore>(
    snapshots: &S,
    last: Option<&ReportId>,
    keep_days: u32,
    now: DateTime<Utc>,
) -> Result<Option<Report>, StoreError> {
    match last {
        Some(last) => snapshots.next_report(last),
        None => {
            let threshold = now - TimeDelta::days(keep_days.into());
            let report = snapshots.first_report_after(threshold)?;
            if report.is_none() {
                debug!(threshold = %threshold, "no report inside the retention window yet");
            }
            Ok(report)
        }
    }
}

/// Save the next pending report. Returns its id, or `None` when the compact
/// storage is up to date.
pub fn save_next<S: SnapshotStore>(
    snapshots: &S,
    storage: &CompactStorage,
    last: Option<&ReportId>,
    keep_days: u32,
) -> Result<Option<ReportId>, StoreError> {
    let Some(report) = pending_report(snapshots, last, keep_days, Utc::now())? else {
        return Ok(None);
    };
    let samples = snapshots.samples_for_report(&report)?;
    let path = storage.save(&report.id, &samples)?;
    info!(
        report = %report.id,
        positions = samples.len(),
        path = %path.display(),
        "compact report saved"
    );
    Ok(Some(report.id))
}
