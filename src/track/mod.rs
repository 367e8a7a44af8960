//! Per-pilot sliding window of observed samples.
//!
//! A [`Track`] keeps the samples of one pilot in strict time order, lets the
//! classifier resolve their lifecycle status, and drops history that is no
//! longer needed once a newer checkpoint exists.

pub mod classifier;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::TrackError;
use crate::model::Sample;

/// Why a sample is kept as a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Regular cadence sample.
    PositionReport,
    /// One side of an on-ground flag change.
    TakeoffLanding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    /// Not yet classified.
    #[default]
    Unknown,
    Checkpoint(CheckpointKind),
    /// Between checkpoints; never archived.
    Excessive,
}

impl SampleStatus {
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, SampleStatus::Checkpoint(_))
    }
}

impl std::fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleStatus::Unknown => write!(f, "unknown"),
            SampleStatus::Checkpoint(CheckpointKind::PositionReport) => write!(f, "position_report"),
            SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding) => write!(f, "takeoff_landing"),
            SampleStatus::Excessive => write!(f, "excessive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackEntry {
    pub sample: Sample,
    pub status: SampleStatus,
    pub archived: bool,
}

impl TrackEntry {
    pub fn new(sample: Sample) -> Self {
        Self {
            sample,
            status: SampleStatus::Unknown,
            archived: false,
        }
    }

    /// Checkpoint that has not reached the archive yet.
    pub fn needs_archival(&self) -> bool {
        self.status.is_checkpoint() && !self.archived
    }
}

/// Tunables of the track window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSettings {
    pub checkpoint_period: TimeDelta,
    pub stale_after: TimeDelta,
    /// How many preceding snapshot reports are replayed for a new track.
    pub backfill_reports: i64,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            checkpoint_period: TimeDelta::minutes(10),
            stale_after: TimeDelta::minutes(90),
            backfill_reports: 180,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pilot_number: i32,
    entries: Vec<TrackEntry>,
}

impl Track {
    pub fn new(pilot_number: i32) -> Self {
        Self {
            pilot_number,
            entries: Vec::new(),
        }
    }

    pub fn pilot_number(&self) -> i32 {
        self.pilot_number
    }

    pub fn entries(&self) -> &[TrackEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [TrackEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn newest(&self) -> Option<&TrackEntry> {
        self.entries.last()
    }

    /// Append a sample as `Unknown`. Samples of another pilot, or not newer
    /// than the newest entry, are rejected and `false` is returned.
    pub fn push(&mut self, sample: Sample) -> bool {
        if sample.pilot_number() != self.pilot_number {
            warn!(
                pilot = self.pilot_number,
                sample_pilot = sample.pilot_number(),
                "sample for another pilot rejected"
            );
            return false;
        }
        if let Some(newest) = self.newest()
            && sample.timestamp() <= newest.sample.timestamp()
        {
            warn!(
                pilot = self.pilot_number,
                report = %sample.report,
                newest = %newest.sample.report,
                "out-of-order sample rejected"
            );
            return false;
        }
        self.entries.push(TrackEntry::new(sample));
        true
    }

    /// Resolve all `Unknown` entries. Returns how many were resolved.
    pub fn classify(&mut self, settings: &TrackSettings) -> Result<usize, TrackError> {
        classifier::classify(self.pilot_number, &mut self.entries, settings.checkpoint_period)
    }

    pub fn last_checkpoint_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.status.is_checkpoint())
    }

    /// Drop every entry older than the most recent checkpoint. Returns the
    /// number of entries removed.
    pub fn trim(&mut self) -> usize {
        match self.last_checkpoint_index() {
            Some(index) => self.entries.drain(..index).count(),
            None => 0,
        }
    }

    /// A track is stale once its newest sample is at least `stale_after`
    /// older than the report being processed. Empty tracks are stale.
    pub fn is_stale(&self, report_time: DateTime<Utc>, stale_after: TimeDelta) -> bool {
        match self.newest() {
            Some(newest) => report_time - newest.sample.timestamp() >= stale_after,
            None => true,
        }
    }
}


#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::test_support::sample;
    use super::*;

    fn settings() -> TrackSettings {
        TrackSettings::default()
    }

    #[test]
    fn test_push_keeps_strict_order() {
        let mut track = Track::new(42);
        assert!(track.push(sample(0, false)));
        assert!(track.push(sample(60, false)));
        assert!(!track.push(sample(60, false)));
        assert!(!track.push(sample(30, false)));
        assert_eq!(track.len(), 2);
        assert_eq!(track.newest().unwrap().status, SampleStatus::Unknown);
    }

    #[test]
    fn test_push_rejects_other_pilot() {
        let mut track = Track::new(7);
        assert!(!track.push(sample(0, false)));
        assert!(track.is_empty());
    }

    #[test]
    fn test_classify_then_trim_keeps_from_last_checkpoint() {
        let mut track = Track::new(42);
        for offset in [0, 120, 240, 600, 720] {
            track.push(sample(offset, false));
        }
        assert_eq!(track.classify(&settings()).unwrap(), 5);
        assert_eq!(track.last_checkpoint_index(), Some(3));

        assert_eq!(track.trim(), 3);
        let kept: Vec<_> = track.entries().iter().map(|e| e.status).collect();
        assert_eq!(
            kept,
            vec![
                SampleStatus::Checkpoint(CheckpointKind::PositionReport),
                SampleStatus::Excessive,
            ]
        );
        assert_eq!(
            track.entries()[0].sample.timestamp(),
            sample(600, false).timestamp()
        );
    }

    #[test]
    fn test_incremental_trim_matches_single_pass() {
        // Cadence gaps, excessive samples and both ground transitions.
        let flight = [
            (0, false),
            (120, false),
            (300, false),
            (570, false),
            (700, false),
            (800, true),
            (900, true),
            (1000, true),
            (1500, true),
            (1560, false),
            (1620, false),
            (2400, false),
            (2460, false),
        ];

        let mut full = Track::new(42);
        for &(offset, on_ground) in &flight {
            full.push(sample(offset, on_ground));
        }
        full.classify(&settings()).unwrap();
        let expected: BTreeMap<_, _> = full
            .entries()
            .iter()
            .map(|e| (e.sample.timestamp(), e.status))
            .collect();

        let mut live = Track::new(42);
        let mut seen = BTreeMap::new();
        for &(offset, on_ground) in &flight {
            live.push(sample(offset, on_ground));
            live.classify(&settings()).unwrap();
            for entry in live.entries() {
                seen.insert(entry.sample.timestamp(), entry.status);
            }
            live.trim();
            assert!(live.entries()[0].status.is_checkpoint());
        }

        assert_eq!(seen, expected);
        let takeoff_landing = SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding);
        let at = |offset| expected[&sample(offset, false).timestamp()];
        assert_eq!(at(120), SampleStatus::Excessive);
        assert_eq!(at(570), SampleStatus::Checkpoint(CheckpointKind::PositionReport));
        assert_eq!(at(700), takeoff_landing);
        assert_eq!(at(800), takeoff_landing);
        assert_eq!(at(1500), takeoff_landing);
        assert_eq!(at(1560), takeoff_landing);
        assert_eq!(at(2400), SampleStatus::Checkpoint(CheckpointKind::PositionReport));
    }

    #[test]
    fn test_trim_without_checkpoint_is_noop() {
        let mut track = Track::new(42);
        track.push(sample(0, false));
        track.push(sample(60, false));
        assert_eq!(track.trim(), 0);
        assert_eq!(track.len(), 2);
    }

    #[test]
    fn test_trim_after_landing_keeps_landing_pair_until_next_checkpoint() {
        let mut track = Track::new(42);
        track.push(sample(0, false));
        track.push(sample(60, true));
        track.classify(&settings()).unwrap();
        assert_eq!(track.trim(), 1);
        assert_eq!(track.len(), 1);
        assert_eq!(
            track.entries()[0].status,
            SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding)
        );
    }

    #[test]
    fn test_staleness_uses_newest_entry() {
        let mut track = Track::new(42);
        track.push(sample(0, false));
        track.push(sample(600, false));
        let stale_after = TimeDelta::minutes(90);
        let newest = sample(600, false).timestamp();

        assert!(!track.is_stale(newest + TimeDelta::minutes(89), stale_after));
        assert!(track.is_stale(newest + TimeDelta::minutes(90), stale_after));
        assert!(Track::new(1).is_stale(newest, stale_after));
    }

    #[test]
    fn test_needs_archival() {
        let mut entry = TrackEntry::new(sample(0, false));
        assert!(!entry.needs_archival());
        entry.status = SampleStatus::Excessive;
        assert!(!entry.needs_archival());
        entry.status = SampleStatus::Checkpoint(CheckpointKind::PositionReport);
        assert!(entry.needs_archival());
        entry.archived = true;
        assert!(!entry.needs_archival());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(SampleStatus::Excessive.to_string(), "excessive");
        assert_eq!(
            SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding).to_string(),
            "takeoff_landing"
        );
    }
}
