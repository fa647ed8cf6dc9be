// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SQLite persistence for quarantine records and scan history

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::actions::{QuarantineRecord, QuarantineStore};
use crate::threat::{DetectionMethod, ThreatVerdict};
use crate::{Result, WardenError};

/// Database manager for Filewarden (thread-safe wrapper)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// A finished scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub session_id: String,
    pub root: String,
    pub state: String,
    pub files: u64,
    pub bytes: u64,
    pub failures: u64,
    /// Category name -> file count, as JSON
    pub categories: serde_json::Value,
    pub duration_secs: f64,
    pub finished_at: DateTime<Utc>,
}

impl Database {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| WardenError::InvalidState("Database lock poisoned".to_string()))
    }

    /// Initialize database schema
    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS quarantine (
                id TEXT PRIMARY KEY,
                original_path TEXT NOT NULL,
                quarantine_path TEXT NOT NULL UNIQUE,
                size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                detection_method TEXT NOT NULL,
                verdict TEXT NOT NULL,
                threat_name TEXT,
                session_id TEXT,
                quarantined_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scan_history (
                session_id TEXT PRIMARY KEY,
                root TEXT NOT NULL,
                state TEXT NOT NULL,
                files INTEGER NOT NULL DEFAULT 0,
                bytes INTEGER NOT NULL DEFAULT 0,
                failures INTEGER NOT NULL DEFAULT 0,
                categories TEXT NOT NULL DEFAULT '{}',
                duration_secs REAL NOT NULL DEFAULT 0.0,
                finished_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_quarantine_original ON quarantine(original_path);
            CREATE INDEX IF NOT EXISTS idx_scan_history_finished ON scan_history(finished_at);
        "#)?;
        Ok(())
    }

    /// Record a finished scan
    pub fn insert_scan(&self, entry: &ScanHistoryEntry) -> Result<()> {
        let conn = self.lock_conn()?;
        let categories = serde_json::to_string(&entry.categories)?;
        conn.execute(
            r#"INSERT OR REPLACE INTO scan_history
               (session_id, root, state, files, bytes, failures, categories, duration_secs, finished_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
            params![
                entry.session_id,
                entry.root,
                entry.state,
                entry.files as i64,
                entry.bytes as i64,
                entry.failures as i64,
                categories,
                entry.duration_secs,
                entry.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Most recent scans first
    pub fn recent_scans(&self, limit: usize) -> Result<Vec<ScanHistoryEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT session_id, root, state, files, bytes, failures, categories, duration_secs, finished_at
               FROM scan_history ORDER BY finished_at DESC LIMIT ?1"#
        )?;

        let scans = stmt.query_map(params![limit as i64], |row| {
            let categories: String = row.get(6)?;
            let finished: String = row.get(8)?;
            Ok(ScanHistoryEntry {
                session_id: row.get(0)?,
                root: row.get(1)?,
                state: row.get(2)?,
                files: row.get::<_, i64>(3)? as u64,
                bytes: row.get::<_, i64>(4)? as u64,
                failures: row.get::<_, i64>(5)? as u64,
                categories: serde_json::from_str(&categories).unwrap_or(serde_json::json!({})),
                duration_secs: row.get(7)?,
                finished_at: parse_time(&finished),
            })
        })?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }

}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn enum_from_text<T: for<'de> Deserialize<'de>>(text: &str) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string())).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

const QUARANTINE_COLUMNS: &str = "id, original_path, quarantine_path, size, content_hash, \
     detection_method, verdict, threat_name, session_id, quarantined_at";

fn quarantine_from_row(row: &Row<'_>) -> rusqlite::Result<QuarantineRecord> {
    let original: String = row.get(1)?;
    let quarantined: String = row.get(2)?;
    let method: String = row.get(5)?;
    let verdict: String = row.get(6)?;
    let at: String = row.get(9)?;
    Ok(QuarantineRecord {
        id: row.get(0)?,
        original_path: PathBuf::from(original),
        quarantine_path: PathBuf::from(quarantined),
        size: row.get::<_, i64>(3)? as u64,
        content_hash: row.get(4)?,
        detection_method: enum_from_text::<DetectionMethod>(&method)?,
        verdict: enum_from_text::<ThreatVerdict>(&verdict)?,
        threat_name: row.get(7)?,
        session_id: row.get(8)?,
        quarantined_at: parse_time(&at),
    })
}

impl QuarantineStore for Database {
    fn insert(&self, record: &QuarantineRecord) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO quarantine
               (id, original_path, quarantine_path, size, content_hash, detection_method, verdict, threat_name, session_id, quarantined_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                record.id,
                record.original_path.to_string_lossy(),
                record.quarantine_path.to_string_lossy(),
                record.size as i64,
                record.content_hash,
                enum_text(&record.detection_method)?,
                enum_text(&record.verdict)?,
                record.threat_name,
                record.session_id,
                record.quarantined_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<QuarantineRecord>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM quarantine WHERE id = ?1", QUARANTINE_COLUMNS),
            params![id],
            quarantine_from_row,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        let removed = conn.execute("DELETE FROM quarantine WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(WardenError::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<QuarantineRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM quarantine ORDER BY quarantined_at DESC",
            QUARANTINE_COLUMNS
        ))?;
        let records = stmt
            .query_map([], quarantine_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
