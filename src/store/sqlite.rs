use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::debug;

use super::{ArchiveStore, ArchivedPosition, ArchivedRemarksId, ArchivedReportId, SnapshotStore};
use crate::errors::StoreError;
use crate::model::{Position, Report, ReportId, Sample};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::LockPoisoned)
}

fn report_from_row(seq: i64, raw: String) -> Result<Report, StoreError> {
    Ok(Report {
        seq,
        id: ReportId::parse(&raw)?,
    })
}

/// Position columns shared by both databases, in `SELECT` order.
const POSITION_COLUMNS: &str = "pilot_number, callsign, latitude, longitude, altitude, \
     groundspeed, heading, qnh_mb, on_ground, fp_aircraft, fp_origin, fp_destination";

fn position_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Position> {
    Ok(Position {
        pilot_number: row.get(offset)?,
        callsign: row.get(offset + 1)?,
        latitude: row.get(offset + 2)?,
        longitude: row.get(offset + 3)?,
        altitude: row.get(offset + 4)?,
        groundspeed: row.get(offset + 5)?,
        heading: row.get(offset + 6)?,
        qnh_mb: row.get(offset + 7)?,
        on_ground: row.get(offset + 8)?,
        fp_aircraft: row.get(offset + 9)?,
        fp_origin: row.get(offset + 10)?,
        fp_destination: row.get(offset + 11)?,
    })
}

// ── Snapshot store ───────────────────────────────────────────────────

/// Snapshot database written by ingestion: one `report` row per snapshot
/// and one `report_pilot_position` row per pilot seen in it.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(open_connection(path)?),
        };
        store.init()?;
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::run_migrations(&conn)
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS report (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS report_pilot_position (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES report(id) ON DELETE CASCADE,
                pilot_number INTEGER NOT NULL,
                callsign TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                altitude INTEGER NOT NULL,
                groundspeed INTEGER NOT NULL,
                heading INTEGER NOT NULL,
                qnh_mb INTEGER NOT NULL,
                on_ground INTEGER NOT NULL,
                fp_aircraft TEXT,
                fp_origin TEXT,
                fp_destination TEXT,
                fp_remarks TEXT,
                UNIQUE(report_id, pilot_number)
            );

            CREATE INDEX IF NOT EXISTS idx_position_pilot ON report_pilot_position(pilot_number, report_id);
            ",
        )?;
        Ok(())
    }

    /// Register a new snapshot. Ids must arrive in chronological order for
    /// `seq` ranges to mean "the previous N reports".
    pub fn insert_report(&self, id: &ReportId) -> Result<Report, StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute("INSERT INTO report (report) VALUES (?1)", params![id.as_str()])?;
        Ok(Report {
            seq: conn.last_insert_rowid(),
            id: id.clone(),
        })
    }

    pub fn insert_samples(&self, report: &Report, samples: &[Sample]) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO report_pilot_position (report_id, pilot_number, callsign, latitude, longitude, altitude,
                     groundspeed, heading, qnh_mb, on_ground, fp_aircraft, fp_origin, fp_destination, fp_remarks)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for sample in samples {
                let p = &sample.position;
                stmt.execute(params![
                    report.seq,
                    p.pilot_number,
                    p.callsign,
                    p.latitude,
                    p.longitude,
                    p.altitude,
                    p.groundspeed,
                    p.heading,
                    p.qnh_mb,
                    p.on_ground,
                    p.fp_aircraft,
                    p.fp_origin,
                    p.fp_destination,
                    sample.fp_remarks,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn last_report(&self) -> Result<Option<Report>, StoreError> {
        self.query_report("SELECT id, report FROM report ORDER BY id DESC LIMIT 1", params![])
    }

    /// Delete `report` and its positions in one transaction. Returns whether
    /// the report existed.
    pub fn remove_report(&self, report: &Report) -> Result<bool, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM report_pilot_position WHERE report_id = ?1",
            params![report.seq],
        )?;
        let removed = tx.execute("DELETE FROM report WHERE id = ?1", params![report.seq])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Remove reports, oldest first, while they were taken at or before
    /// `threshold`. Returns the removed ids.
    pub fn remove_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<ReportId>, StoreError> {
        let mut removed = Vec::new();
        while let Some(report) = self.first_report()? {
            if report.id.timestamp() > threshold {
                break;
            }
            if !self.remove_report(&report)? {
                break;
            }
            debug!(report = %report.id, "snapshot report removed");
            removed.push(report.id);
        }
        Ok(removed)
    }

    pub fn report_count(&self) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        Ok(conn.query_row("SELECT COUNT(*) FROM report", [], |row| row.get(0))?)
    }

    fn query_report(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Option<Report>, StoreError> {
        let conn = lock(&self.conn)?;
        let row: Option<(i64, String)> = conn
            .query_row(sql, params, |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        row.map(|(seq, raw)| report_from_row(seq, raw)).transpose()
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn first_report(&self) -> Result<Option<Report>, StoreError> {
        self.query_report("SELECT id, report FROM report ORDER BY id LIMIT 1", params![])
    }

    fn next_report(&self, after: &ReportId) -> Result<Option<Report>, StoreError> {
        self.query_report(
            "SELECT id, report FROM report WHERE report > ?1 ORDER BY id LIMIT 1",
            params![after.as_str()],
        )
    }

    fn find_report(&self, id: &ReportId) -> Result<Option<Report>, StoreError> {
        self.query_report("SELECT id, report FROM report WHERE report = ?1", params![id.as_str()])
    }

    fn first_report_after(&self, threshold: DateTime<Utc>) -> Result<Option<Report>, StoreError> {
        let threshold = ReportId::from_timestamp(threshold);
        self.next_report(&threshold)
    }

    fn samples_for_report(&self, report: &Report) -> Result<Vec<Sample>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS}, fp_remarks FROM report_pilot_position
             WHERE report_id = ?1 ORDER BY pilot_number"
        ))?;
        let rows = stmt.query_map(params![report.seq], |row| {
            Ok((position_from_row(row, 0)?, row.get::<_, Option<String>>(12)?))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (position, fp_remarks) = row?;
            samples.push(Sample {
                report: report.id.clone(),
                position,
                fp_remarks,
            });
        }
        Ok(samples)
    }

    fn samples_for_entity(
        &self,
        pilot_number: i32,
        seq_range: RangeInclusive<i64>,
    ) -> Result<Vec<Sample>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT r.report, {POSITION_COLUMNS}, fp_remarks
             FROM report_pilot_position p JOIN report r ON r.id = p.report_id
             WHERE p.pilot_number = ?1 AND p.report_id BETWEEN ?2 AND ?3
             ORDER BY p.report_id"
        ))?;
        let rows = stmt.query_map(
            params![pilot_number, seq_range.start(), seq_range.end()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    position_from_row(row, 1)?,
                    row.get::<_, Option<String>>(13)?,
                ))
            },
        )?;

        let mut samples = Vec::new();
        for row in rows {
            let (raw, position, fp_remarks) = row?;
            samples.push(Sample {
                report: ReportId::parse(&raw)?,
                position,
                fp_remarks,
            });
        }
        Ok(samples)
    }
}

// ── Archive store ────────────────────────────────────────────────────

/// Row counts of the archive database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ArchiveCounts {
    pub reports: i64,
    pub positions: i64,
    pub remarks: i64,
}

/// Permanent, deduplicated record of checkpoint positions.
pub struct SqliteArchiveStore {
    conn: Mutex<Connection>,
}

impl SqliteArchiveStore {
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(open_connection(path)?),
        };
        store.init()?;
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::run_migrations(&conn)
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS archived_report (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS archived_fp_remarks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                year INTEGER NOT NULL,
                remarks TEXT NOT NULL,
                UNIQUE(year, remarks)
            );

            CREATE TABLE IF NOT EXISTS archived_position (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id INTEGER NOT NULL REFERENCES archived_report(id),
                pilot_number INTEGER NOT NULL,
                callsign TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                altitude INTEGER NOT NULL,
                groundspeed INTEGER NOT NULL,
                heading INTEGER NOT NULL,
                qnh_mb INTEGER NOT NULL,
                on_ground INTEGER NOT NULL,
                fp_aircraft TEXT,
                fp_origin TEXT,
                fp_destination TEXT,
                fp_remarks_id INTEGER REFERENCES archived_fp_remarks(id),
                UNIQUE(report_id, pilot_number)
            );

            CREATE INDEX IF NOT EXISTS idx_archived_position_pilot ON archived_position(pilot_number);
            ",
        )?;
        Ok(())
    }

    pub fn counts(&self) -> Result<ArchiveCounts, StoreError> {
        let conn = lock(&self.conn)?;
        let count = |table: &str| -> Result<i64, StoreError> {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
        };
        Ok(ArchiveCounts {
            reports: count("archived_report")?,
            positions: count("archived_position")?,
            remarks: count("archived_fp_remarks")?,
        })
    }

    /// Archived rows of one pilot, oldest report first.
    pub fn positions_for_pilot(
        &self,
        pilot_number: i32,
    ) -> Result<Vec<(ReportId, ArchivedPosition)>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT r.report, {POSITION_COLUMNS}, fp_remarks_id
             FROM archived_position p JOIN archived_report r ON r.id = p.report_id
             WHERE p.pilot_number = ?1
             ORDER BY r.report"
        ))?;
        let rows = stmt.query_map(params![pilot_number], |row| {
            Ok((
                row.get::<_, String>(0)?,
                position_from_row(row, 1)?,
                row.get::<_, Option<i64>>(13)?,
            ))
        })?;

        let mut positions = Vec::new();
        for row in rows {
            let (raw, p, remarks_id) = row?;
            positions.push((
                ReportId::parse(&raw)?,
                ArchivedPosition {
                    pilot_number: p.pilot_number,
                    callsign: p.callsign,
                    latitude: p.latitude,
                    longitude: p.longitude,
                    altitude: p.altitude,
                    groundspeed: p.groundspeed,
                    heading: p.heading,
                    qnh_mb: p.qnh_mb,
                    on_ground: p.on_ground,
                    fp_aircraft: p.fp_aircraft,
                    fp_origin: p.fp_origin,
                    fp_destination: p.fp_destination,
                    fp_remarks: remarks_id.map(ArchivedRemarksId),
                },
            ));
        }
        Ok(positions)
    }

    pub fn remarks_text(&self, id: ArchivedRemarksId) -> Result<Option<String>, StoreError> {
        let conn = lock(&self.conn)?;
        Ok(conn
            .query_row(
                "SELECT remarks FROM archived_fp_remarks WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?)
    }
}

impl ArchiveStore for SqliteArchiveStore {
    fn lookup_or_create_archived_report(&self, report: &ReportId) -> Result<ArchivedReportId, StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO archived_report (report) VALUES (?1)",
            params![report.as_str()],
        )?;
        let id = conn.query_row(
            "SELECT id FROM archived_report WHERE report = ?1",
            params![report.as_str()],
            |row| row.get(0),
        )?;
        Ok(ArchivedReportId(id))
    }

    fn archived_position_exists(
        &self,
        report: ArchivedReportId,
        pilot_number: i32,
    ) -> Result<bool, StoreError> {
        let conn = lock(&self.conn)?;
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM archived_position WHERE report_id = ?1 AND pilot_number = ?2)",
            params![report.0, pilot_number],
            |row| row.get(0),
        )?)
    }

    fn lookup_or_create_archived_remarks(
        &self,
        year: i32,
        remarks: &str,
    ) -> Result<ArchivedRemarksId, StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO archived_fp_remarks (year, remarks) VALUES (?1, ?2)",
            params![year, remarks],
        )?;
        let id = conn.query_row(
            "SELECT id FROM archived_fp_remarks WHERE year = ?1 AND remarks = ?2",
            params![year, remarks],
            |row| row.get(0),
        )?;
        Ok(ArchivedRemarksId(id))
    }

    fn save_archived_position(
        &self,
        report: ArchivedReportId,
        position: &ArchivedPosition,
    ) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO archived_position (report_id, pilot_number, callsign, latitude, longitude, altitude,
                 groundspeed, heading, qnh_mb, on_ground, fp_aircraft, fp_origin, fp_destination, fp_remarks_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                report.0,
                position.pilot_number,
                position.callsign,
                position.latitude,
                position.longitude,
                position.altitude,
                position.groundspeed,
                position.heading,
                position.qnh_mb,
                position.on_ground,
                position.fp_aircraft,
                position.fp_origin,
                position.fp_destination,
                position.fp_remarks.map(|id| id.0),
            ],
        )?;
        Ok(())
    }
}
