// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-file records produced by a scan

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::classifier::{Category, Classification, ClassificationMethod};
use crate::features::ExtractedFile;
use crate::threat::{DetectionMethod, ThreatAssessment, ThreatVerdict};
use crate::{Result, WardenError};

/// Lifecycle of a file within one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Scanned,
    Planned,
    Moved,
    Deleted,
    Quarantined,
    Failed,
}

impl RecordStatus {
    /// Terminal states are left only through an explicit restore
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::Moved | RecordStatus::Deleted | RecordStatus::Quarantined
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Scanned => "scanned",
            RecordStatus::Planned => "planned",
            RecordStatus::Moved => "moved",
            RecordStatus::Deleted => "deleted",
            RecordStatus::Quarantined => "quarantined",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file observed during a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub extension: String,
    /// Computed lazily, only when hashing is actually required
    pub content_hash: Option<String>,
    pub entropy: f64,
    pub category: Category,
    pub confidence: f64,
    pub method: ClassificationMethod,
    pub threat: ThreatVerdict,
    pub threat_name: Option<String>,
    pub detection_method: Option<DetectionMethod>,
    /// Whether the session rule set selected this file
    pub rule_match: bool,
    pub status: RecordStatus,
    /// Where an organize apply moved the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<PathBuf>,
    /// Last action error, if any
    pub error: Option<String>,
}

impl FileRecord {
    pub fn new(file: &ExtractedFile, classification: Classification) -> Self {
        Self {
            path: file.path.clone(),
            size: file.size,
            modified: file.modified,
            extension: file.features.extension.clone(),
            content_hash: None,
            entropy: file.features.entropy,
            category: classification.category,
            confidence: classification.confidence,
            method: classification.method,
            threat: ThreatVerdict::None,
            threat_name: None,
            detection_method: None,
            rule_match: false,
            status: RecordStatus::Scanned,
            moved_to: None,
            error: None,
        }
    }

    pub fn apply_threat(&mut self, assessment: ThreatAssessment) {
        self.threat = assessment.verdict;
        self.threat_name = assessment.threat_name;
        self.detection_method = assessment.method;
    }

    /// Move to `next`, refusing to leave a terminal state
    pub fn transition(&mut self, next: RecordStatus) -> Result<()> {
        if self.status.is_terminal() && self.status != next {
            return Err(WardenError::InvalidState(format!(
                "{} is already {}, cannot become {}",
                self.path.display(),
                self.status,
                next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Record a failed action without touching terminal states
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        if !self.status.is_terminal() {
            self.status = RecordStatus::Failed;
        }
    }

    /// Explicit restore: the only way back out of `quarantined`
    pub fn restore(&mut self, path: PathBuf) {
        self.path = path;
        self.status = RecordStatus::Scanned;
        self.error = None;
    }

    /// Age in fractional days relative to `reference`
    pub fn age_days(&self, reference: DateTime<Utc>) -> f64 {
        (reference - self.modified).num_seconds() as f64 / 86_400.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureVector, MimeClass};

    pub(crate) fn record() -> FileRecord {
        let file = ExtractedFile {
            path: PathBuf::from("/data/a.txt"),
            size: 10,
            modified: Utc::now(),
            features: FeatureVector {
                size: 10,
                extension: "txt".into(),
                entropy: 2.0,
                mime: MimeClass::Text,
                age_days: 0.0,
                path_depth: 3,
                in_temp_folder: false,
            },
        };
        FileRecord::new(&file, Classification::heuristic(&file.features))
    }

    #[test]
    fn test_status_never_leaves_terminal_state() {
        let mut rec = record();
        rec.transition(RecordStatus::Planned).unwrap();
        rec.transition(RecordStatus::Moved).unwrap();
        assert!(rec.transition(RecordStatus::Deleted).is_err());
        assert_eq!(rec.status, RecordStatus::Moved);

        rec.mark_failed("boom");
        assert_eq!(rec.status, RecordStatus::Moved);
        assert_eq!(rec.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_restore_resets_quarantine() {
        let mut rec = record();
        rec.transition(RecordStatus::Quarantined).unwrap();
        rec.restore(PathBuf::from("/data/a.txt"));
        assert_eq!(rec.status, RecordStatus::Scanned);
    }
}
