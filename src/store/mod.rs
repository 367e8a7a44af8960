//! Relational store boundaries.
//!
//! The engine reads snapshots through [`SnapshotStore`] and writes the
//! permanent record through [`ArchiveStore`]. Both are synchronous; the run
//! loop moves whole cycles onto the blocking pool.

pub mod sqlite;

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::StoreError;
use crate::model::{Report, ReportId, Sample};

pub use sqlite::{SqliteArchiveStore, SqliteSnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArchivedReportId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArchivedRemarksId(pub i64);

/// Row written to the archive for one checkpoint sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedPosition {
    pub pilot_number: i32,
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub groundspeed: u16,
    pub heading: u16,
    pub qnh_mb: u16,
    pub on_ground: bool,
    pub fp_aircraft: Option<String>,
    pub fp_origin: Option<String>,
    pub fp_destination: Option<String>,
    pub fp_remarks: Option<ArchivedRemarksId>,
}

impl ArchivedPosition {
    pub fn from_sample(sample: &Sample, fp_remarks: Option<ArchivedRemarksId>) -> Self {
        let p = &sample.position;
        Self {
            pilot_number: p.pilot_number,
            callsign: p.callsign.clone(),
            latitude: p.latitude,
            longitude: p.longitude,
            altitude: p.altitude,
            groundspeed: p.groundspeed,
            heading: p.heading,
            qnh_mb: p.qnh_mb,
            on_ground: p.on_ground,
            fp_aircraft: p.fp_aircraft.clone(),
            fp_origin: p.fp_origin.clone(),
            fp_destination: p.fp_destination.clone(),
            fp_remarks,
        }
    }
}

/// Read side: the snapshots produced by ingestion.
pub trait SnapshotStore: Send + Sync {
    fn first_report(&self) -> Result<Option<Report>, StoreError>;

    /// The report following `after` in sequence order.
    fn next_report(&self, after: &ReportId) -> Result<Option<Report>, StoreError>;

    fn find_report(&self, id: &ReportId) -> Result<Option<Report>, StoreError>;

    /// The oldest report taken strictly after `threshold`.
    fn first_report_after(&self, threshold: DateTime<Utc>) -> Result<Option<Report>, StoreError>;

    fn samples_for_report(&self, report: &Report) -> Result<Vec<Sample>, StoreError>;

    /// Samples of one pilot from reports whose `seq` lies in `seq_range`,
    /// ascending.
    fn samples_for_entity(
        &self,
        pilot_number: i32,
        seq_range: RangeInclusive<i64>,
    ) -> Result<Vec<Sample>, StoreError>;
}

/// Write side: the permanent, deduplicated record.
pub trait ArchiveStore: Send + Sync {
    fn lookup_or_create_archived_report(&self, report: &ReportId) -> Result<ArchivedReportId, StoreError>;

    fn archived_position_exists(
        &self,
        report: ArchivedReportId,
        pilot_number: i32,
    ) -> Result<bool, StoreError>;

    fn lookup_or_create_archived_remarks(
        &self,
        year: i32,
        remarks: &str,
    ) -> Result<ArchivedRemarksId, StoreError>;

    fn save_archived_position(
        &self,
        report: ArchivedReportId,
        position: &ArchivedPosition,
    ) -> Result<(), StoreError>;
}

impl<T: SnapshotStore + ?Sized> SnapshotStore for Arc<T> {
    fn first_report(&self) -> Result<Option<Report>, StoreError> {
        (**self).first_report()
    }

    fn next_report(&self, after: &ReportId) -> Result<Option<Report>, StoreError> {
        (**self).next_report(after)
    }

    fn find_report(&self, id: &ReportId) -> Result<Option<Report>, StoreError> {
        (**self).find_report(id)
    }

    fn first_report_after(&self, threshold: DateTime<Utc>) -> Result<Option<Report>, StoreError> {
        (**self).first_report_after(threshold)
    }

    fn samples_for_report(&self, report: &Report) -> Result<Vec<Sample>, StoreError> {
        (**self).samples_for_report(report)
    }

    fn samples_for_entity(
        &self,
        pilot_number: i32,
        seq_range: RangeInclusive<i64>,
    ) -> Result<Vec<Sample>, StoreError> {
        (**self).samples_for_entity(pilot_number, seq_range)
    }
}

impl<T: ArchiveStore + ?Sized> ArchiveStore for Arc<T> {
    fn lookup_or_create_archived_report(&self, report: &ReportId) -> Result<ArchivedReportId, StoreError> {
        (**self).lookup_or_create_archived_report(report)
    }

    fn archived_position_exists(
        &self,
        report: ArchivedReportId,
        pilot_number: i32,
    ) -> Result<bool, StoreError> {
        (**self).archived_position_exists(report, pilot_number)
    }

    fn lookup_or_create_archived_remarks(
        &self,
        year: i32,
        remarks: &str,
    ) -> Result<ArchivedRemarksId, StoreError> {
        (**self).lookup_or_create_archived_remarks(year, remarks)
    }

    fn save_archived_position(
        &self,
        report: ArchivedReportId,
        position: &ArchivedPosition,
    ) -> Result<(), StoreError> {
        (**self).save_archived_position(report, position)
    }
}
