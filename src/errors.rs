//! Typed error hierarchy for the datafeeder.
//!
//! Four enums cover the subsystems:
//! - `CodecError`: malformed compact (V1) report data
//! - `TrackError`: corrupted in-memory track state
//! - `StoreError`: snapshot/archive store and filesystem failures
//! - `CompactionError`: what a compaction cycle can fail with

use thiserror::Error;

use crate::model::ReportId;

/// Errors from decoding a compact report file. Always fatal to the decode call.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unknown report head: expected version {expected}, found {found}")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("Truncated report data: needed {needed} bytes for {section}")]
    Truncated { section: &'static str, needed: usize },

    #[error("Missing EOF marker: found {found:#010x}")]
    MissingEof { found: u32 },

    #[error("Record count mismatch: header declares {declared}, decoded {decoded}")]
    CountMismatch { declared: u32, decoded: usize },

    #[error("I/O error while reading report data: {0}")]
    Io(#[from] std::io::Error),
}

/// Invariant violations in a pilot track.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("Could not find previous checkpoint in track of pilot {pilot_number}")]
    MissingCheckpoint { pilot_number: i32 },
}

/// Errors from the snapshot store, the archive store and compact storage.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid report id '{0}': expected yyyyMMddHHmmss")]
    InvalidReportId(String),

    #[error("Report {0} not found")]
    ReportNotFound(ReportId),

    #[error("Corrupt compact file for report {report}: {source}")]
    Corrupt {
        report: ReportId,
        #[source]
        source: CodecError,
    },

    #[error("Store lock poisoned")]
    LockPoisoned,

    /// A lookup failure handed to every caller that waited on the same
    /// cache entry.
    #[error(transparent)]
    Shared(std::sync::Arc<StoreError>),
}

impl StoreError {
    /// Take back sole ownership of a cached lookup failure when possible.
    pub(crate) fn from_shared(shared: std::sync::Arc<StoreError>) -> Self {
        std::sync::Arc::try_unwrap(shared).unwrap_or_else(StoreError::Shared)
    }

    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a compaction cycle.
///
/// `Store` failures are transient: the report is retried on the next cycle.
/// `Invariant` failures mean a track is corrupted and the loop must stop.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Track invariant violated: {0}")]
    Invariant(#[from] TrackError),
}

impl CompactionError {
    /// Whether retrying the same report on a later cycle can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CompactionError::Store(_))
    }
}
