// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan sessions and their options

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressSnapshot, ProgressTracker};
use crate::record::FileRecord;
use crate::rules::RuleSet;

/// Per-session settings supplied to `start_scan`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub rules: RuleSet,
    #[serde(default = "default_true")]
    pub use_ml: bool,
    /// Run the threat assessor when one is configured
    #[serde(default = "default_true")]
    pub threat_scan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_files: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            rules: RuleSet::default(),
            use_ml: true,
            threat_scan: true,
            max_files: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    Failed,
    Cancelled,
}

impl ScanState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ScanState::Completed | ScanState::Failed | ScanState::Cancelled
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Completed => "completed",
            ScanState::Failed => "failed",
            ScanState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A file the scan could not process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub error: String,
}

/// One traversal run. Records are owned here for the session's lifetime.
#[derive(Debug)]
pub struct ScanSession {
    id: String,
    root: PathBuf,
    options: ScanOptions,
    started_at: DateTime<Utc>,
    state: watch::Sender<ScanState>,
    progress: ProgressTracker,
    cancel: CancellationToken,
    records: Mutex<Vec<FileRecord>>,
    failures: Mutex<Vec<ScanFailure>>,
    fatal: Mutex<Option<String>>,
}

impl ScanSession {
    pub fn new(id: String, root: PathBuf, options: ScanOptions) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            id,
            root,
            options,
            started_at: Utc::now(),
            state,
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
            records: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Reference time for ages and age-based rules
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.progress.snapshot(&self.id, self.state())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn begin(&self) {
        self.state.send_replace(ScanState::Scanning);
    }

    /// Enter a terminal state. Later calls are ignored.
    pub(crate) fn finish(&self, state: ScanState) {
        self.progress.finish();
        self.state.send_if_modified(|current| {
            if current.is_finished() {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Resolve once the session reaches a terminal state
    pub async fn wait(&self) -> ScanState {
        let mut rx = self.state.subscribe();
        let finished = match rx.wait_for(ScanState::is_finished).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        finished
    }

    pub(crate) fn push_record(&self, record: FileRecord) {
        lock(&self.records).push(record);
    }

    pub(crate) fn push_failure(&self, failure: ScanFailure) {
        lock(&self.failures).push(failure);
    }

    pub(crate) fn set_fatal(&self, message: String) {
        *lock(&self.fatal) = Some(message);
    }

    /// Copy of the records in traversal order
    pub fn records(&self) -> Vec<FileRecord> {
        lock(&self.records).clone()
    }

    /// Exclusive access for the action executor
    pub(crate) fn records_mut(&self) -> MutexGuard<'_, Vec<FileRecord>> {
        lock(&self.records)
    }

    pub fn failures(&self) -> Vec<ScanFailure> {
        lock(&self.failures).clone()
    }

    /// Why the session failed, when it did
    pub fn fatal_error(&self) -> Option<String> {
        lock(&self.fatal).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
