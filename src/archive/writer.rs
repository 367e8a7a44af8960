//! Idempotent archival of checkpoint entries.

use tracing::debug;

use crate::cache::{ArchiveCache, CacheSettings, CacheStats};
use crate::errors::StoreError;
use crate::model::ReportId;
use crate::store::{ArchiveStore, ArchivedPosition, ArchivedRemarksId, ArchivedReportId};
use crate::track::{Track, TrackEntry};

/// What happened to one entry passed to [`ArchiveWriter::archive_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Not a checkpoint, or already archived.
    Skipped,
    /// A row for this report and pilot already existed.
    AlreadyPresent,
    Saved,
}

pub struct ArchiveWriter<A> {
    store: A,
    reports: ArchiveCache<ReportId, ArchivedReportId>,
    remarks: ArchiveCache<(i32, String), ArchivedRemarksId>,
}

impl<A: ArchiveStore> ArchiveWriter<A> {
    pub fn new(store: A, settings: &CacheSettings) -> Self {
        Self {
            store,
            reports: ArchiveCache::new(settings.reports_capacity, settings.idle),
            remarks: ArchiveCache::new(settings.remarks_capacity, settings.idle),
        }
    }

    /// Archive-side id of `report`, from cache or store, creating it if absent.
    pub fn archived_report(&self, report: &ReportId) -> Result<ArchivedReportId, StoreError> {
        self.reports
            .get_or_try_insert_with(report.clone(), || {
                let id = self.store.lookup_or_create_archived_report(report)?;
                debug!(report = %report, archived_report = id.0, "archived report resolved");
                Ok::<_, StoreError>(id)
            })
            .map_err(StoreError::from_shared)
    }

    fn archived_remarks(&self, year: i32, remarks: &str) -> Result<ArchivedRemarksId, StoreError> {
        self.remarks
            .get_or_try_insert_with((year, remarks.to_string()), || {
                self.store.lookup_or_create_archived_remarks(year, remarks)
            })
            .map_err(StoreError::from_shared)
    }

    /// Persist `entry` if it is an unarchived checkpoint. `archived` is set
    /// only once the row is known to exist; on error it stays `false`.
    pub fn archive_entry(&self, entry: &mut TrackEntry) -> Result<ArchiveOutcome, StoreError> {
        if !entry.needs_archival() {
            return Ok(ArchiveOutcome::Skipped);
        }

        let sample = &entry.sample;
        let archived_report = self.archived_report(&sample.report)?;

        if self
            .store
            .archived_position_exists(archived_report, sample.pilot_number())?
        {
            debug!(
                pilot = sample.pilot_number(),
                report = %sample.report,
                "position already archived"
            );
            entry.archived = true;
            return Ok(ArchiveOutcome::AlreadyPresent);
        }

        let fp_remarks = match sample.normalized_remarks() {
            Some(remarks) => Some(self.archived_remarks(sample.report.year(), remarks)?),
            None => None,
        };

        let position = ArchivedPosition::from_sample(sample, fp_remarks);
        self.store.save_archived_position(archived_report, &position)?;
        debug!(
            pilot = sample.pilot_number(),
            report = %sample.report,
            status = %entry.status,
            "position archived"
        );

        entry.archived = true;
        Ok(ArchiveOutcome::Saved)
    }

    /// Archive every pending checkpoint of `track`, oldest first. Returns the
    /// number of rows written. Stops at the first store failure.
    pub fn archive_track(&self, track: &mut Track) -> Result<usize, StoreError> {
        let mut saved = 0;
        for entry in track.entries_mut() {
            if self.archive_entry(entry)? == ArchiveOutcome::Saved {
                saved += 1;
            }
        }
        Ok(saved)
    }

    pub fn report_cache_stats(&self) -> CacheStats {
        self.reports.stats()
    }

    pub fn remarks_cache_stats(&self) -> CacheStats {
        self.remarks.stats()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_support::CountingArchive;
    use super::*;
    use crate::track::test_support::{entry, entry_at};
    use crate::track::{CheckpointKind, SampleStatus};

    const POSITION_REPORT: SampleStatus = SampleStatus::Checkpoint(CheckpointKind::PositionReport);

    fn writer(archive: &CountingArchive) -> ArchiveWriter<CountingArchive> {
        ArchiveWriter::new(archive.clone(), &CacheSettings::default())
    }

    #[test]
    fn test_archives_checkpoint_once() {
        let archive = CountingArchive::new();
        let writer = writer(&archive);
        let mut e = entry_at(0, false, POSITION_REPORT);

        assert_eq!(writer.archive_entry(&mut e).unwrap(), ArchiveOutcome::Saved);
        assert!(e.archived);
        assert_eq!(writer.archive_entry(&mut e).unwrap(), ArchiveOutcome::Skipped);
        assert_eq!(archive.saves(), 1);
    }

    #[test]
    fn test_skips_excessive_and_unknown() {
        let archive = CountingArchive::new();
        let writer = writer(&archive);
        let mut unknown = entry(0, false);
        let mut excessive = entry_at(60, false, SampleStatus::Excessive);

        assert_eq!(writer.archive_entry(&mut unknown).unwrap(), ArchiveOutcome::Skipped);
        assert_eq!(writer.archive_entry(&mut excessive).unwrap(), ArchiveOutcome::Skipped);
        assert!(!unknown.archived && !excessive.archived);
        assert_eq!(archive.report_lookups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_existing_row_is_not_duplicated() {
        let archive = CountingArchive::new();
        let mut first = entry_at(0, false, POSITION_REPORT);
        writer(&archive).archive_entry(&mut first).unwrap();

        // A fresh writer has cold caches, as after a restart.
        let mut again = entry_at(0, false, POSITION_REPORT);
        let outcome = writer(&archive).archive_entry(&mut again).unwrap();

        assert_eq!(outcome, ArchiveOutcome::AlreadyPresent);
        assert!(again.archived);
        assert_eq!(archive.saves(), 1);
        assert_eq!(archive.inner.counts().unwrap().positions, 1);
    }

    #[test]
    fn test_store_failure_leaves_entry_unarchived() {
        let archive = CountingArchive::new();
        archive.fail_saves.store(true, Ordering::SeqCst);
        let writer = writer(&archive);
        let mut e = entry_at(0, false, POSITION_REPORT);

        assert!(writer.archive_entry(&mut e).is_err());
        assert!(!e.archived);

        archive.fail_saves.store(false, Ordering::SeqCst);
        assert_eq!(writer.archive_entry(&mut e).unwrap(), ArchiveOutcome::Saved);
        assert!(e.archived);
    }

    #[test]
    fn test_report_and_remarks_lookups_are_cached() {
        let archive = CountingArchive::new();
        let writer = writer(&archive);

        for offset in [0, 600] {
            let mut e = entry_at(offset, false, POSITION_REPORT);
            e.sample.fp_remarks = Some("  PBN/A1B1  ".to_string());
            writer.archive_entry(&mut e).unwrap();
        }
        let mut same_report = entry_at(600, false, POSITION_REPORT);
        same_report.sample.position.pilot_number = 43;
        same_report.sample.fp_remarks = Some("PBN/A1B1".to_string());
        writer.archive_entry(&mut same_report).unwrap();

        assert_eq!(archive.report_lookups.load(Ordering::SeqCst), 2);
        assert_eq!(archive.remarks_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(writer.report_cache_stats().size, 2);
        assert_eq!(writer.remarks_cache_stats().size, 1);

        let counts = archive.inner.counts().unwrap();
        assert_eq!(counts.positions, 3);
        assert_eq!(counts.remarks, 1);
        let rows = archive.inner.positions_for_pilot(42).unwrap();
        let remarks_id = rows[0].1.fp_remarks.unwrap();
        assert_eq!(
            archive.inner.remarks_text(remarks_id).unwrap().as_deref(),
            Some("PBN/A1B1")
        );
    }

    #[test]
    fn test_blank_remarks_are_not_archived() {
        let archive = CountingArchive::new();
        let mut e = entry_at(0, false, POSITION_REPORT);
        e.sample.fp_remarks = Some("   ".to_string());
        writer(&archive).archive_entry(&mut e).unwrap();

        assert_eq!(archive.remarks_lookups.load(Ordering::SeqCst), 0);
        let rows = archive.inner.positions_for_pilot(42).unwrap();
        assert_eq!(rows[0].1.fp_remarks, None);
    }

    #[test]
    fn test_archive_track_counts_saved_rows() {
        let archive = CountingArchive::new();
        let writer = writer(&archive);
        let mut track = Track::new(42);
        for offset in [0, 120, 600] {
            track.push(entry(offset, false).sample);
        }
        track.classify(&Default::default()).unwrap();

        assert_eq!(writer.archive_track(&mut track).unwrap(), 2);
        assert_eq!(writer.archive_track(&mut track).unwrap(), 0);
        let flags: Vec<_> = track.entries().iter().map(|e| e.archived).collect();
        assert_eq!(flags, vec![true, false, true]);
    }
}
