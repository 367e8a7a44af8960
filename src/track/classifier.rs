//! Position classification.
//!
//! Resolves every `Unknown` entry of a track, oldest first:
//!
//! 1. The first entry of the window is a position report checkpoint.
//! 2. A change of the on-ground flag against the previous entry marks both
//!    entries as takeoff/landing checkpoints. The previous entry's status is
//!    overwritten whatever it was; if it was already archived under its old
//!    status the archived row is left as is.
//! 3. Otherwise the entry becomes a position report checkpoint once
//!    `period - 30s` has elapsed since the nearest earlier checkpoint, and is
//!    excessive before that.

use chrono::TimeDelta;

use super::{CheckpointKind, SampleStatus, TrackEntry};
use crate::errors::TrackError;

/// Tolerance subtracted from the checkpoint period, so a report arriving a
/// few seconds early still opens a new checkpoint.
pub const CHECKPOINT_SLACK: TimeDelta = TimeDelta::seconds(30);

/// Classify all `Unknown` entries in place. Returns how many were resolved.
pub fn classify(
    pilot_number: i32,
    entries: &mut [TrackEntry],
    checkpoint_period: TimeDelta,
) -> Result<usize, TrackError> {
    let threshold = checkpoint_period - CHECKPOINT_SLACK;
    let mut resolved = 0;

    for i in 0..entries.len() {
        if entries[i].status != SampleStatus::Unknown {
            continue;
        }
        resolved += 1;

        if i == 0 {
            entries[i].status = SampleStatus::Checkpoint(CheckpointKind::PositionReport);
            continue;
        }

        let (earlier, rest) = entries.split_at_mut(i);
        let current = &mut rest[0];
        let previous = &mut earlier[i - 1];

        if current.sample.on_ground() != previous.sample.on_ground() {
            current.status = SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding);
            previous.status = SampleStatus::Checkpoint(CheckpointKind::TakeoffLanding);
            continue;
        }

        let last_checkpoint = earlier
            .iter()
            .rev()
            .find(|entry| entry.status.is_checkpoint())
            .ok_or(TrackError::MissingCheckpoint { pilot_number })?;

        let elapsed = current.sample.timestamp() - last_checkpoint.sample.timestamp();
        current.status = if elapsed >= threshold {
            SampleStatus::Checkpoint(CheckpointKind::PositionReport)
        } else {
            SampleStatus::Excessive
        };
    }

    Ok(resolved)
}
