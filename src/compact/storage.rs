//! One compact file per report under `<root>/<NETWORK>/compactified`.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::WalkDir;

use super::v1;
use crate::errors::StoreError;
use crate::model::{Network, ReportId, Sample};

pub struct CompactStorage {
    root: PathBuf,
}

impl CompactStorage {
    /// Open the storage for `network`, creating its directory if needed.
    pub fn open(storage_root: &Path, network: Network) -> Result<Self, StoreError> {
        let root = storage_root.join(network.as_upper()).join("compactified");
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn report_path(&self, report: &ReportId) -> PathBuf {
        self.root.join(report.as_str())
    }

    /// Write the report's positions. The file is written under a temporary
    /// name and renamed, so readers never observe a partial file.
    pub fn save(&self, report: &ReportId, samples: &[Sample]) -> Result<PathBuf, StoreError> {
        let path = self.report_path(report);
        let tmp_path = self.root.join(format!(".{}.tmp", report));

        let positions: Vec<_> = samples.iter().map(|s| s.position.clone()).collect();

        let file = fs::File::create(&tmp_path).map_err(|e| StoreError::io(&tmp_path, e))?;
        let mut out = BufWriter::new(file);
        v1::encode(&positions, &mut out).map_err(|e| StoreError::io(&tmp_path, e))?;
        out.into_inner()
            .map_err(|e| StoreError::io(&tmp_path, e.into_error()))?
            .sync_all()
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| StoreError::io(&path, e))?;

        debug!(report = %report, positions = positions.len(), "compact report saved");
        Ok(path)
    }

    /// Load the report's positions as samples of that report. Remarks are
    /// not part of the compact format and come back as `None`.
    pub fn load(&self, report: &ReportId) -> Result<Vec<Sample>, StoreError> {
        let path = self.report_path(report);
        if !path.is_file() {
            return Err(StoreError::ReportNotFound(report.clone()));
        }

        let file = fs::File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        let positions = v1::decode(&mut BufReader::new(file)).map_err(|source| StoreError::Corrupt {
            report: report.clone(),
            source,
        })?;

        Ok(positions
            .into_iter()
            .map(|position| Sample::new(report.clone(), position))
            .collect())
    }

    pub fn first_report(&self) -> Result<Option<ReportId>, StoreError> {
        Ok(self.list_reports()?.into_iter().next())
    }

    pub fn last_report(&self) -> Result<Option<ReportId>, StoreError> {
        Ok(self.list_reports()?.pop())
    }

    /// The report stored right after `previous`, if `previous` is stored.
    pub fn next_report(&self, previous: &ReportId) -> Result<Option<ReportId>, StoreError> {
        let reports = self.list_reports()?;
        let Some(index) = reports.iter().position(|r| r == previous) else {
            return Ok(None);
        };
        Ok(reports.into_iter().nth(index + 1))
    }

    /// All stored report ids, oldest first. Files whose name is not a
    /// report id (temporaries, notes) are ignored.
    pub fn list_reports(&self) -> Result<Vec<ReportId>, StoreError> {
        let mut reports = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && let Ok(report) = ReportId::parse(name)
            {
                reports.push(report);
            }
        }
        reports.sort();
        Ok(reports)
    }

    pub fn remove_report(&self, report: &ReportId) -> Result<bool, StoreError> {
        let path = self.report_path(report);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Remove every report taken at or before `threshold`. Returns the removed ids.
    pub fn remove_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<ReportId>, StoreError> {
        let mut removed = Vec::new();
        for report in self.list_reports()? {
            if report.timestamp() > threshold {
                break;
            }
            if self.remove_report(&report)? {
                removed.push(report);
            }
        }
        Ok(removed)
    }
}
