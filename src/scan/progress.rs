// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Lock-free progress counters polled by callers

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::ScanState;

/// Counters shared between workers and pollers
#[derive(Debug)]
pub struct ProgressTracker {
    files_seen: AtomicU64,
    bytes_seen: AtomicU64,
    failures: AtomicU64,
    started: Instant,
    elapsed_at_finish: OnceLock<Duration>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            files_seen: AtomicU64::new(0),
            bytes_seen: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            started: Instant::now(),
            elapsed_at_finish: OnceLock::new(),
        }
    }

    pub fn record_file(&self, bytes: u64) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
        self.bytes_seen.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Freeze the elapsed clock
    pub fn finish(&self) {
        let _ = self.elapsed_at_finish.set(self.started.elapsed());
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed_at_finish
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed())
    }

    pub fn files_seen(&self) -> u64 {
        self.files_seen.load(Ordering::Relaxed)
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, session_id: &str, state: ScanState) -> ProgressSnapshot {
        ProgressSnapshot {
            session_id: session_id.to_string(),
            state,
            files_seen: self.files_seen(),
            bytes_seen: self.bytes_seen(),
            failures: self.failures(),
            elapsed_secs: self.elapsed().as_secs_f64(),
        }
    }
}

/// Point-in-time view returned by `get_progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub state: ScanState,
    pub files_seen: u64,
    pub bytes_seen: u64,
    pub failures: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_frozen_clock() {
        let tracker = ProgressTracker::new();
        tracker.record_file(100);
        tracker.record_file(50);
        tracker.record_failure();

        tracker.finish();
        let first = tracker.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.elapsed(), first);

        let snap = tracker.snapshot("s", ScanState::Completed);
        assert_eq!(snap.files_seen, 3);
        assert_eq!(snap.bytes_seen, 150);
        assert_eq!(snap.failures, 1);
    }
}
