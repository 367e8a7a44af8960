//! Per-report compaction cycle.
//!
//! For every snapshot report the compactor extends the live tracks with the
//! report's samples, classifies them, archives new checkpoints, trims the
//! windows and retires tracks that went quiet.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use super::writer::ArchiveWriter;
use crate::errors::{CompactionError, StoreError};
use crate::model::{Report, ReportId, Sample};
use crate::store::{ArchiveStore, SnapshotStore};
use crate::track::{Track, TrackSettings};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Summary of one processed report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleStats {
    pub report: ReportId,
    pub pilots_processed: usize,
    pub live_tracks: usize,
    pub retained_samples: usize,
    pub avg_samples_per_track: f64,
    pub archived: usize,
    pub evicted: usize,
    pub cached_reports: usize,
    pub cached_remarks: usize,
}

pub struct Compactor<S, A> {
    snapshots: S,
    writer: ArchiveWriter<A>,
    settings: TrackSettings,
    tracks: HashMap<i32, Track>,
}

impl<S: SnapshotStore, A: ArchiveStore> Compactor<S, A> {
    pub fn new(snapshots: S, writer: ArchiveWriter<A>, settings: TrackSettings) -> Self {
        Self {
            snapshots,
            writer,
            settings,
            tracks: HashMap::new(),
        }
    }

    pub fn track(&self, pilot_number: i32) -> Option<&Track> {
        self.tracks.get(&pilot_number)
    }

    /// Process the report after `last`, or the first report when nothing
    /// was processed yet. Returns `None` when no newer report exists.
    pub fn process_next(
        &mut self,
        last: Option<&ReportId>,
    ) -> Result<Option<CycleStats>, CompactionError> {
        let report = match last {
            Some(last) => self.snapshots.next_report(last)?,
            None => self.snapshots.first_report()?,
        };
        match report {
            Some(report) => self.process_report(&report).map(Some),
            None => Ok(None),
        }
    }

    /// Run one cycle for `report`.
    ///
    /// A store failure aborts the cycle with entries left unarchived; running
    /// the same report again completes it without duplicating rows. A track
    /// invariant failure is not recoverable.
    pub fn process_report(&mut self, report: &Report) -> Result<CycleStats, CompactionError> {
        debug!(report = %report.id, "archiving report");
        self.writer.archived_report(&report.id)?;

        let mut current: HashMap<i32, Sample> = self
            .snapshots
            .samples_for_report(report)?
            .into_iter()
            .map(|s| (s.pilot_number(), s))
            .collect();
        debug!(report = %report.id, positions = current.len(), "positions loaded");

        let mut pilots: Vec<i32> = self.tracks.keys().copied().collect();
        pilots.extend(current.keys().filter(|p| !self.tracks.contains_key(*p)).copied());
        pilots.sort_unstable();

        let total = pilots.len();
        let mut archived = 0;
        let mut evicted = 0;
        let mut last_progress = Instant::now();

        for (done, pilot_number) in pilots.into_iter().enumerate() {
            let sample = current.remove(&pilot_number);
            archived += self.process_pilot(report, pilot_number, sample)?;

            if self.evict_if_stale(report, pilot_number) {
                evicted += 1;
            }

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                info!(report = %report.id, done = done + 1, total, "archiving in progress");
                last_progress = Instant::now();
            }
        }

        let stats = self.stats(report, total, archived, evicted);
        info!(
            report = %stats.report,
            live_tracks = stats.live_tracks,
            retained_samples = stats.retained_samples,
            avg_samples_per_track = stats.avg_samples_per_track,
            archived = stats.archived,
            evicted = stats.evicted,
            cached_reports = stats.cached_reports,
            cached_remarks = stats.cached_remarks,
            "report archived"
        );
        Ok(stats)
    }

    fn process_pilot(
        &mut self,
        report: &Report,
        pilot_number: i32,
        sample: Option<Sample>,
    ) -> Result<usize, CompactionError> {
        let track = match self.tracks.entry(pilot_number) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(backfill(
                &self.snapshots,
                &self.settings,
                report,
                pilot_number,
            )?),
        };

        if let Some(sample) = sample {
            track.push(sample);
        }

        track.classify(&self.settings)?;
        let saved = self.writer.archive_track(track)?;
        let trimmed = track.trim();
        if saved > 0 || trimmed > 0 {
            debug!(pilot = pilot_number, saved, trimmed, remaining = track.len(), "track updated");
        }
        Ok(saved)
    }

    fn evict_if_stale(&mut self, report: &Report, pilot_number: i32) -> bool {
        let stale = self
            .tracks
            .get(&pilot_number)
            .is_some_and(|t| t.is_stale(report.id.timestamp(), self.settings.stale_after));
        if stale {
            self.tracks.remove(&pilot_number);
            debug!(pilot = pilot_number, "stale track evicted");
        }
        stale
    }

    fn stats(&self, report: &Report, processed: usize, archived: usize, evicted: usize) -> CycleStats {
        let live_tracks = self.tracks.len();
        let retained_samples: usize = self.tracks.values().map(Track::len).sum();
        let avg_samples_per_track = if live_tracks == 0 {
            0.0
        } else {
            retained_samples as f64 / live_tracks as f64
        };
        CycleStats {
            report: report.id.clone(),
            pilots_processed: processed,
            live_tracks,
            retained_samples,
            avg_samples_per_track,
            archived,
            evicted,
            cached_reports: self.writer.report_cache_stats().size,
            cached_remarks: self.writer.remarks_cache_stats().size,
        }
    }
}

/// New track for `pilot_number`, seeded with its samples from the reports
/// preceding `report`.
fn backfill<S: SnapshotStore>(
    snapshots: &S,
    settings: &TrackSettings,
    report: &Report,
    pilot_number: i32,
) -> Result<Track, StoreError> {
    let range = (report.seq - settings.backfill_reports)..=(report.seq - 1);
    let previous = snapshots.samples_for_entity(pilot_number, range)?;
    let mut track = Track::new(pilot_number);
    let backfilled = previous.len();
    for sample in previous {
        track.push(sample);
    }
    if backfilled > 0 {
        debug!(pilot = pilot_number, backfilled, "track backfilled");
    }
    Ok(track)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use chrono::TimeDelta;

    use super::*;
    use crate::archive::writer::test_support::CountingArchive;
    use crate::cache::CacheSettings;
    use crate::errors::TrackError;
    use crate::model::Position;
    use crate::store::SqliteSnapshotStore;
    use crate::track::{CheckpointKind, SampleStatus};

    const BASE: &str = "20241211120000";
    const POSITION_REPORT: SampleStatus = SampleStatus::Checkpoint(CheckpointKind::PositionReport);
    const TAKEOFF_LANDING: SampleStatus = SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding);

    struct Harness {
        snapshots: Arc<SqliteSnapshotStore>,
        archive: CountingArchive,
        compactor: Compactor<Arc<SqliteSnapshotStore>, CountingArchive>,
    }

    impl Harness {
        fn new() -> Self {
            let snapshots = Arc::new(SqliteSnapshotStore::new_in_memory().unwrap());
            let archive = CountingArchive::new();
            let writer = ArchiveWriter::new(archive.clone(), &CacheSettings::default());
            let compactor = Compactor::new(snapshots.clone(), writer, TrackSettings::default());
            Self {
                snapshots,
                archive,
                compactor,
            }
        }

        /// Insert a report taken `offset_secs` after `BASE` holding the
        /// given `(pilot, on_ground)` observations.
        fn report(&self, offset_secs: i64, pilots: &[(i32, bool)]) -> Report {
            let base = ReportId::parse(BASE).unwrap().timestamp();
            let id = ReportId::from_timestamp(base + TimeDelta::seconds(offset_secs));
            let report = self.snapshots.insert_report(&id).unwrap();
            let samples: Vec<_> = pilots
                .iter()
                .map(|&(pilot_number, on_ground)| {
                    Sample::new(
                        id.clone(),
                        Position {
                            pilot_number,
                            callsign: format!("TST{pilot_number}"),
                            on_ground,
                            ..Position::default()
                        },
                    )
                })
                .collect();
            self.snapshots.insert_samples(&report, &samples).unwrap();
            report
        }

        fn statuses(&self, pilot_number: i32) -> Vec<(SampleStatus, bool)> {
            self.compactor
                .track(pilot_number)
                .map(|t| t.entries().iter().map(|e| (e.status, e.archived)).collect())
                .unwrap_or_default()
        }

        fn archived_reports(&self, pilot_number: i32) -> Vec<String> {
            self.archive
                .inner
                .positions_for_pilot(pilot_number)
                .unwrap()
                .into_iter()
                .map(|(report, _)| report.to_string())
                .collect()
        }
    }

    #[test]
    fn test_three_cycle_takeoff_scenario() {
        let mut h = Harness::new();
        let r1 = h.report(0, &[(42, true)]);
        let r2 = h.report(120, &[(42, true)]);
        let r3 = h.report(130, &[(42, false)]);

        let stats = h.compactor.process_report(&r1).unwrap();
        assert_eq!(stats.archived, 1);
        assert_eq!(h.statuses(42), vec![(POSITION_REPORT, true)]);

        let stats = h.compactor.process_report(&r2).unwrap();
        assert_eq!(stats.archived, 0);
        assert_eq!(
            h.statuses(42),
            vec![(POSITION_REPORT, true), (SampleStatus::Excessive, false)]
        );

        let stats = h.compactor.process_report(&r3).unwrap();
        assert_eq!(stats.archived, 2);
        assert_eq!(
            h.archived_reports(42),
            vec![r1.id.to_string(), r2.id.to_string(), r3.id.to_string()]
        );
        // Trimming keeps everything from the newest checkpoint on.
        assert_eq!(h.statuses(42), vec![(TAKEOFF_LANDING, true)]);
        assert_eq!(stats.live_tracks, 1);
        assert_eq!(stats.retained_samples, 1);
    }

    #[test]
    fn test_process_next_walks_reports_in_order() {
        let mut h = Harness::new();
        assert!(h.compactor.process_next(None).unwrap().is_none());

        let r1 = h.report(0, &[(1, false)]);
        let r2 = h.report(60, &[(1, false)]);

        let first = h.compactor.process_next(None).unwrap().unwrap();
        assert_eq!(first.report, r1.id);
        let second = h.compactor.process_next(Some(&r1.id)).unwrap().unwrap();
        assert_eq!(second.report, r2.id);
        assert!(h.compactor.process_next(Some(&r2.id)).unwrap().is_none());
    }

    #[test]
    fn test_new_track_is_backfilled_from_previous_reports() {
        let mut h = Harness::new();
        let r1 = h.report(0, &[(7, false)]);
        h.report(60, &[(7, false)]);
        let r3 = h.report(600, &[(7, false)]);

        let stats = h.compactor.process_report(&r3).unwrap();

        assert_eq!(stats.archived, 2);
        assert_eq!(h.archived_reports(7), vec![r1.id.to_string(), r3.id.to_string()]);
        assert_eq!(h.statuses(7), vec![(POSITION_REPORT, true)]);
    }

    #[test]
    fn test_stale_track_is_evicted() {
        let mut h = Harness::new();
        let r1 = h.report(0, &[(5, false), (6, false)]);
        let r2 = h.report(89 * 60, &[(6, false)]);
        let r3 = h.report(90 * 60, &[(6, false)]);

        h.compactor.process_report(&r1).unwrap();
        let stats = h.compactor.process_report(&r2).unwrap();
        assert_eq!(stats.evicted, 0);
        assert!(h.compactor.track(5).is_some());

        let stats = h.compactor.process_report(&r3).unwrap();
        assert_eq!(stats.evicted, 1);
        assert!(h.compactor.track(5).is_none());
        assert!(h.compactor.track(6).is_some());
        assert_eq!(stats.live_tracks, 1);
    }

    #[test]
    fn test_failed_cycle_retries_without_duplicates() {
        let mut h = Harness::new();
        let r1 = h.report(0, &[(42, false), (43, false)]);

        h.archive.fail_saves.store(true, Ordering::SeqCst);
        let err = h.compactor.process_report(&r1).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.archive.saves(), 0);

        h.archive.fail_saves.store(false, Ordering::SeqCst);
        let stats = h.compactor.process_report(&r1).unwrap();
        assert_eq!(stats.archived, 2);
        assert_eq!(h.statuses(42), vec![(POSITION_REPORT, true)]);
        assert_eq!(h.statuses(43), vec![(POSITION_REPORT, true)]);

        let stats = h.compactor.process_report(&r1).unwrap();
        assert_eq!(stats.archived, 0);
        assert_eq!(h.archive.saves(), 2);
    }

    #[test]
    fn test_cycle_stats_report_cache_sizes() {
        let mut h = Harness::new();
        let r1 = h.report(0, &[(1, false), (2, true), (3, false)]);
        let stats = h.compactor.process_report(&r1).unwrap();

        assert_eq!(stats.pilots_processed, 3);
        assert_eq!(stats.live_tracks, 3);
        assert_eq!(stats.retained_samples, 3);
        assert_eq!(stats.avg_samples_per_track, 1.0);
        assert_eq!(stats.cached_reports, 1);
        assert_eq!(stats.cached_remarks, 0);
    }

    #[test]
    fn test_invariant_error_is_fatal() {
        let err = CompactionError::from(TrackError::MissingCheckpoint { pilot_number: 1 });
        assert!(!err.is_retryable());
    }
}
