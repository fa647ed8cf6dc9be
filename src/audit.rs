// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Audit trail of scans and file actions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use crate::Result;

/// One audited step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub file_path: PathBuf,
    pub action: String,
    pub outcome: String,
}

impl AuditEvent {
    pub fn new(session_id: &str, file_path: &Path, action: &str, outcome: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            file_path: file_path.to_path_buf(),
            action: action.to_string(),
            outcome: outcome.to_string(),
        }
    }
}

/// Receives audit events. Recording never fails the action being audited.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Append-only JSON Lines log
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an event to the log
    pub fn append(&self, event: &AuditEvent) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all events, skipping lines that do not parse
    pub fn read_all(&self) -> Result<Vec<AuditEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("Failed to parse audit entry: {}", e);
                }
            }
        }

        Ok(events)
    }

    /// Get the most recent N events (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<AuditEvent>> {
        let mut events = self.read_all()?;
        events.reverse();
        events.truncate(count);
        Ok(events)
    }

    pub fn for_session(&self, session_id: &str) -> Result<Vec<AuditEvent>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.append(event) {
            warn!("Audit log {:?} not written: {}", self.path, e);
        }
    }
}

/// Mirrors events into the log stream
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        info!(
            session = %event.session_id,
            action = %event.action,
            outcome = %event.outcome,
            "audit {}",
            event.file_path.display()
        );
    }
}

/// Keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Forwards every event to several sinks
#[derive(Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}
