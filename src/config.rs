//! Configuration for trackfeed.
//!
//! Settings are read from `trackfeed.toml` and layered:
//! file → environment (`TRACKFEED_*`) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [storage]
//! root = "./data"
//! network = "vatsim"
//!
//! [archive]
//! checkpoint_period_minutes = 10
//! stale_after_minutes = 90
//! backfill_reports = 180
//! idle_sleep_secs = 60
//!
//! [cache]
//! reports_capacity = 1000
//! remarks_capacity = 10000
//! idle_minutes = 10
//!
//! [compact]
//! keep_days = 1
//!
//! [snapshots]
//! keep_days = 30
//!
//! [logging]
//! dir = "./data/logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::cache::CacheSettings;
use crate::model::Network;
use crate::track::TrackSettings;

pub const DEFAULT_CONFIG_FILE: &str = "trackfeed.toml";

pub const ENV_STORAGE_ROOT: &str = "TRACKFEED_STORAGE_ROOT";
pub const ENV_NETWORK: &str = "TRACKFEED_NETWORK";
pub const ENV_KEEP_DAYS: &str = "TRACKFEED_KEEP_DAYS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory holding one subdirectory per network.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub network: Network,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            network: Network::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSection {
    #[serde(default = "default_checkpoint_period_minutes")]
    pub checkpoint_period_minutes: u32,
    /// Tracks without a sample for this long are dropped from memory.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u32,
    /// Preceding snapshot reports replayed when a pilot has no live track.
    #[serde(default = "default_backfill_reports")]
    pub backfill_reports: u32,
    /// Sleep between polls when no new report is available.
    #[serde(default = "default_idle_sleep_secs")]
    pub idle_sleep_secs: u64,
}

fn default_checkpoint_period_minutes() -> u32 {
    10
}

fn default_stale_after_minutes() -> u32 {
    90
}

fn default_backfill_reports() -> u32 {
    180
}

fn default_idle_sleep_secs() -> u64 {
    60
}

impl Default for ArchiveSection {
    fn default() -> Self {
        Self {
            checkpoint_period_minutes: default_checkpoint_period_minutes(),
            stale_after_minutes: default_stale_after_minutes(),
            backfill_reports: default_backfill_reports(),
            idle_sleep_secs: default_idle_sleep_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_reports_capacity")]
    pub reports_capacity: usize,
    #[serde(default = "default_remarks_capacity")]
    pub remarks_capacity: usize,
    #[serde(default = "default_idle_minutes")]
    pub idle_minutes: u64,
}

fn default_reports_capacity() -> usize {
    1000
}

fn default_remarks_capacity() -> usize {
    10_000
}

fn default_idle_minutes() -> u64 {
    10
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            reports_capacity: default_reports_capacity(),
            remarks_capacity: default_remarks_capacity(),
            idle_minutes: default_idle_minutes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactSection {
    /// Compact files older than this many days are removed by cleanup.
    #[serde(default = "default_keep_days")]
    pub keep_days: u32,
}

fn default_keep_days() -> u32 {
    1
}

impl Default for CompactSection {
    fn default() -> Self {
        Self {
            keep_days: default_keep_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotsSection {
    /// Snapshot reports this many days older than the last archived report
    /// are removed by cleanup.
    #[serde(default = "default_snapshot_keep_days")]
    pub keep_days: u32,
}

fn default_snapshot_keep_days() -> u32 {
    30
}

impl Default for SnapshotsSection {
    fn default() -> Self {
        Self {
            keep_days: default_snapshot_keep_days(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Daily-rolling log files are written here when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// The complete trackfeed.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub compact: CompactSection,
    #[serde(default)]
    pub snapshots: SnapshotsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl FeedToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse trackfeed.toml")
    }

    /// Defaults when `path` does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize trackfeed.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup(ENV_STORAGE_ROOT).filter(|v| !v.is_empty()) {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(network) = lookup(ENV_NETWORK).filter(|v| !v.is_empty()) {
            self.storage.network = network
                .parse()
                .with_context(|| format!("Invalid {}", ENV_NETWORK))?;
        }
        if let Some(days) = lookup(ENV_KEEP_DAYS).filter(|v| !v.is_empty()) {
            self.compact.keep_days = days
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} '{}'", ENV_KEEP_DAYS, days))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.archive.checkpoint_period_minutes == 0 {
            warnings.push(
                "checkpoint_period_minutes is 0: every sample becomes a checkpoint".to_string(),
            );
        }
        if self.archive.stale_after_minutes < self.archive.checkpoint_period_minutes {
            warnings.push(format!(
                "stale_after_minutes ({}) is shorter than checkpoint_period_minutes ({}): tracks are dropped before their next checkpoint",
                self.archive.stale_after_minutes, self.archive.checkpoint_period_minutes
            ));
        }
        if self.archive.backfill_reports == 0 {
            warnings.push("backfill_reports is 0: new tracks start without history".to_string());
        }
        if self.cache.reports_capacity == 0 {
            warnings.push("cache.reports_capacity is 0: every archived report lookup hits the store".to_string());
        }
        if self.cache.remarks_capacity == 0 {
            warnings.push("cache.remarks_capacity is 0: every remarks lookup hits the store".to_string());
        }
        if self.compact.keep_days == 0 {
            warnings.push("compact.keep_days is 0: treated as 1".to_string());
        }
        if self.snapshots.keep_days == 0 {
            warnings.push("snapshots.keep_days is 0: treated as 1".to_string());
        }

        warnings
    }
}

/// Resolved configuration: the parsed file with environment and CLI
/// overrides applied.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub config_path: PathBuf,
    pub toml: FeedToml,
    pub verbose: bool,
}

impl FeedConfig {
    /// Load `config_path` (defaults if missing) and apply the process
    /// environment.
    pub fn load(config_path: &Path) -> Result<Self> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env(
        config_path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut toml = FeedToml::load_or_default(config_path)?;
        toml.apply_env(lookup)?;
        Ok(Self {
            config_path: config_path.to_path_buf(),
            toml,
            verbose: false,
        })
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn storage_root(&self) -> &Path {
        &self.toml.storage.root
    }

    pub fn network(&self) -> Network {
        self.toml.storage.network
    }

    /// `<root>/<NETWORK>`
    pub fn network_dir(&self) -> PathBuf {
        self.storage_root().join(self.network().as_upper())
    }

    pub fn snapshot_db_path(&self) -> PathBuf {
        self.network_dir().join("snapshots.db")
    }

    pub fn archive_db_path(&self) -> PathBuf {
        self.network_dir().join("archive.db")
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.toml.logging.dir.as_deref()
    }

    /// Keep-days, with an optional CLI override. Never less than one day.
    pub fn keep_days(&self, cli_override: Option<u32>) -> u32 {
        cli_override.unwrap_or(self.toml.compact.keep_days).max(1)
    }

    /// Snapshot retention in days, with an optional CLI override. Never less
    /// than one day.
    pub fn snapshot_keep_days(&self, cli_override: Option<u32>) -> u32 {
        cli_override.unwrap_or(self.toml.snapshots.keep_days).max(1)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs(self.toml.archive.idle_sleep_secs)
    }

    pub fn track_settings(&self) -> TrackSettings {
        let archive = &self.toml.archive;
        TrackSettings {
            checkpoint_period: TimeDelta::minutes(archive.checkpoint_period_minutes.into()),
            stale_after: TimeDelta::minutes(archive.stale_after_minutes.into()),
            backfill_reports: archive.backfill_reports.into(),
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            reports_capacity: self.toml.cache.reports_capacity,
            remarks_capacity: self.toml.cache.remarks_capacity,
            idle: Duration::from_secs(self.toml.cache.idle_minutes.saturating_mul(60)),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = FeedToml::parse("").unwrap();
        assert_eq!(toml, FeedToml::default());
        assert_eq!(toml.storage.root, PathBuf::from("./data"));
        assert_eq!(toml.storage.network, Network::Vatsim);
        assert_eq!(toml.archive.checkpoint_period_minutes, 10);
        assert_eq!(toml.archive.stale_after_minutes, 90);
        assert_eq!(toml.archive.backfill_reports, 180);
        assert_eq!(toml.cache.reports_capacity, 1000);
        assert_eq!(toml.cache.remarks_capacity, 10_000);
        assert_eq!(toml.cache.idle_minutes, 10);
        assert_eq!(toml.compact.keep_days, 1);
        assert_eq!(toml.snapshots.keep_days, 30);
        assert_eq!(toml.logging.dir, None);
    }

    #[test]
    fn test_parse_partial_sections() {
        let content = r#"
[storage]
network = "ivao"

[archive]
checkpoint_period_minutes = 5
"#;
        let toml = FeedToml::parse(content).unwrap();
        assert_eq!(toml.storage.network, Network::Ivao);
        assert_eq!(toml.storage.root, PathBuf::from("./data"));
        assert_eq!(toml.archive.checkpoint_period_minutes, 5);
        assert_eq!(toml.archive.stale_after_minutes, 90);
    }

    #[test]
    fn test_parse_rejects_unknown_network() {
        assert!(FeedToml::parse("[storage]\nnetwork = \"faa\"\n").is_err());
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trackfeed.toml");

        let mut toml = FeedToml::default();
        toml.storage.root = PathBuf::from("/srv/trackfeed");
        toml.compact.keep_days = 7;
        toml.logging.dir = Some(PathBuf::from("/var/log/trackfeed"));
        toml.save(&path).unwrap();

        assert_eq!(FeedToml::load(&path).unwrap(), toml);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = FeedToml::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(toml, FeedToml::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trackfeed.toml");
        std::fs::write(&path, "[storage]\nroot = \"/from/file\"\n\n[compact]\nkeep_days = 3\n").unwrap();

        let config = FeedConfig::load_with_env(
            &path,
            env(&[
                (ENV_STORAGE_ROOT, "/from/env"),
                (ENV_NETWORK, "IVAO"),
                (ENV_KEEP_DAYS, "14"),
            ]),
        )
        .unwrap();

        assert_eq!(config.storage_root(), Path::new("/from/env"));
        assert_eq!(config.network(), Network::Ivao);
        assert_eq!(config.keep_days(None), 14);
        assert_eq!(config.keep_days(Some(2)), 2);
        assert_eq!(config.keep_days(Some(0)), 1);
    }

    #[test]
    fn test_snapshot_keep_days() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trackfeed.toml");
        std::fs::write(&path, "[snapshots]\nkeep_days = 0\n").unwrap();

        let config = FeedConfig::load_with_env(&path, env(&[])).unwrap();
        assert_eq!(config.snapshot_keep_days(None), 1);
        assert_eq!(config.snapshot_keep_days(Some(45)), 45);
        assert!(config.validate().iter().any(|w| w.contains("snapshots.keep_days")));
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trackfeed.toml");
        assert!(FeedConfig::load_with_env(&path, env(&[(ENV_KEEP_DAYS, "many")])).is_err());
        assert!(FeedConfig::load_with_env(&path, env(&[(ENV_NETWORK, "faa")])).is_err());
    }

    #[test]
    fn test_paths_and_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trackfeed.toml");
        std::fs::write(
            &path,
            "[archive]\ncheckpoint_period_minutes = 5\nbackfill_reports = 30\n\n[cache]\nidle_minutes = 2\n",
        )
        .unwrap();
        let config = FeedConfig::load_with_env(&path, env(&[(ENV_STORAGE_ROOT, "/data")])).unwrap();

        assert_eq!(config.network_dir(), PathBuf::from("/data/VATSIM"));
        assert_eq!(config.snapshot_db_path(), PathBuf::from("/data/VATSIM/snapshots.db"));
        assert_eq!(config.archive_db_path(), PathBuf::from("/data/VATSIM/archive.db"));

        let track = config.track_settings();
        assert_eq!(track.checkpoint_period, TimeDelta::minutes(5));
        assert_eq!(track.stale_after, TimeDelta::minutes(90));
        assert_eq!(track.backfill_reports, 30);
        assert_eq!(config.cache_settings().idle, Duration::from_secs(120));
        assert_eq!(config.idle_sleep(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_defaults_clean() {
        assert!(FeedToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_reports_suspicious_values() {
        let mut toml = FeedToml::default();
        toml.archive.checkpoint_period_minutes = 0;
        toml.cache.remarks_capacity = 0;
        toml.compact.keep_days = 0;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("checkpoint_period_minutes")));
        assert!(warnings.iter().any(|w| w.contains("remarks_capacity")));
        assert!(warnings.iter().any(|w| w.contains("keep_days")));
    }

    #[test]
    fn test_validate_stale_shorter_than_period() {
        let mut toml = FeedToml::default();
        toml.archive.stale_after_minutes = 5;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("stale_after_minutes"));
    }
}
