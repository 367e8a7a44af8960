//! Persisted "last processed report" per background task.
//!
//! Each task (`Archive-VATSIM`, `SaveCmp-IVAO`, ...) owns one marker file
//! under `<root>/<NETWORK>/markers/`. A task resumes after the report named
//! in its marker.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::{Network, ReportId};

pub const ARCHIVE_TASK: &str = "Archive";
pub const SAVE_COMPACT_TASK: &str = "SaveCmp";
pub const CLEANUP_COMPACT_TASK: &str = "CleanCompact";
pub const CLEANUP_TASK: &str = "Cleanup";

/// Task name as used for marker and lock files, e.g. `Archive-VATSIM`.
pub fn task_name(task: &str, network: Network) -> String {
    format!("{}-{}", task, network.as_upper())
}

pub struct ReportMarker {
    path: PathBuf,
}

impl ReportMarker {
    pub fn new(storage_root: &Path, network: Network, task: &str) -> Self {
        Self {
            path: storage_root
                .join(network.as_upper())
                .join("markers")
                .join(task_name(task, network)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last processed report, or `None` if the task never completed one.
    pub fn load(&self) -> Result<Option<ReportId>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read marker {}", self.path.display()))?;
        let raw = content.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        let report = ReportId::parse(raw)
            .with_context(|| format!("Marker {} is corrupt", self.path.display()))?;
        Ok(Some(report))
    }

    /// Record `report` as processed. Written to a temporary file first and
    /// renamed over the marker.
    pub fn save(&self, report: &ReportId) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("Marker path has no parent directory")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create marker directory {}", dir.display()))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", report)).context("Failed to write marker")?;
        fs::rename(&tmp, &self.path).context("Failed to replace marker")?;
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove marker")?;
        }
        Ok(())
    }
}
