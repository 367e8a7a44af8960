//! Domain types shared by the stores, the codec and the compaction engine.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Format of a report id: the snapshot's UTC timestamp.
const REPORT_ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Tracking network a datafeeder instance works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Vatsim,
    Ivao,
}

impl Network {
    /// Directory and task-name form, e.g. `VATSIM`.
    pub fn as_upper(&self) -> &'static str {
        match self {
            Network::Vatsim => "VATSIM",
            Network::Ivao => "IVAO",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Vatsim => write!(f, "vatsim"),
            Network::Ivao => write!(f, "ivao"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vatsim" => Ok(Network::Vatsim),
            "ivao" => Ok(Network::Ivao),
            _ => anyhow::bail!("Invalid network '{}'. Valid values: vatsim, ivao", s),
        }
    }
}

/// Identifier of one snapshot: its timestamp as `yyyyMMddHHmmss`.
///
/// The string form sorts chronologically, so `Ord` is derived.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportId {
    raw: String,
    timestamp: DateTime<Utc>,
}

impl ReportId {
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if raw.len() != 14 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StoreError::InvalidReportId(raw.to_string()));
        }
        let naive = NaiveDateTime::parse_from_str(raw, REPORT_ID_FORMAT)
            .map_err(|_| StoreError::InvalidReportId(raw.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            timestamp: Utc.from_utc_datetime(&naive),
        })
    }

    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        Self {
            raw: timestamp.format(REPORT_ID_FORMAT).to_string(),
            timestamp,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for ReportId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReportId {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ReportId> for String {
    fn from(value: ReportId) -> Self {
        value.raw
    }
}

/// A snapshot-store row. `seq` is the store's monotonic row id and bounds
/// backfill lookups; `id` is the report timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub seq: i64,
    pub id: ReportId,
}

/// The fixed-width-encodable part of an observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub pilot_number: i32,
    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Feet.
    pub altitude: i32,
    /// Knots.
    pub groundspeed: u16,
    /// Degrees.
    pub heading: u16,
    pub qnh_mb: u16,
    pub on_ground: bool,
    pub fp_aircraft: Option<String>,
    pub fp_origin: Option<String>,
    pub fp_destination: Option<String>,
}

/// One pilot's observation within one report.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub report: ReportId,
    pub position: Position,
    pub fp_remarks: Option<String>,
}

impl Sample {
    pub fn new(report: ReportId, position: Position) -> Self {
        Self {
            report,
            position,
            fp_remarks: None,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.fp_remarks = Some(remarks.into());
        self
    }

    pub fn pilot_number(&self) -> i32 {
        self.position.pilot_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.report.timestamp()
    }

    pub fn on_ground(&self) -> bool {
        self.position.on_ground
    }

    /// Remarks as stored in the archive: trimmed, `None` when blank.
    pub fn normalized_remarks(&self) -> Option<&str> {
        self.fp_remarks
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}
