// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Actions on scanned files: organize, delete, quarantine
//!
//! Every batch processes files independently and always returns an
//! [`OperationSummary`], even when some files fail.

pub mod organize;
pub mod quarantine;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::classifier::Category;
use crate::record::{FileRecord, RecordStatus};
use crate::rules::RuleSet;
use crate::{Result, WardenError};

pub use organize::{destination_dir, DestinationPlanner, Placement};
pub use quarantine::{
    quarantine_name, Quarantine, QuarantineAction, QuarantineRecord, QuarantineStore,
};

/// How an existing destination is judged to be the same file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateCheck {
    #[default]
    Size,
    SizeAndHash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizeOptions {
    /// Add a `YYYY-MM` folder from the modification time
    #[serde(default)]
    pub dated_folders: bool,
    #[serde(default)]
    pub duplicate_check: DuplicateCheck,
    /// Restrict to these categories; empty means all
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Planned,
    Moved,
    SkippedDuplicate,
    Deleted,
    Quarantined,
    Restored,
    Skipped,
    Failed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Planned => "planned",
            OutcomeKind::Moved => "moved",
            OutcomeKind::SkippedDuplicate => "moved:skipped-duplicate",
            OutcomeKind::Deleted => "deleted",
            OutcomeKind::Quarantined => "quarantined",
            OutcomeKind::Restored => "restored",
            OutcomeKind::Skipped => "skipped",
            OutcomeKind::Failed => "failed",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub path: PathBuf,
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    pub size: u64,
    /// Reasons, or the error for failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Result of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub dry_run: bool,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Bytes moved, deleted or quarantined (planned, for a dry run)
    pub bytes_affected: u64,
    pub outcomes: Vec<ActionOutcome>,
}

impl OperationSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn push(&mut self, outcome: ActionOutcome) {
        match outcome.kind {
            OutcomeKind::Failed => self.failed += 1,
            OutcomeKind::Skipped | OutcomeKind::SkippedDuplicate => self.skipped += 1,
            _ => {
                self.succeeded += 1;
                self.bytes_affected += outcome.size;
            }
        }
        self.outcomes.push(outcome);
    }

    /// Planned or realized destinations, in batch order
    pub fn destinations(&self) -> Vec<(PathBuf, Option<PathBuf>)> {
        self.outcomes
            .iter()
            .map(|o| (o.path.clone(), o.destination.clone()))
            .collect()
    }
}

/// Move a file, falling back to copy and remove across filesystems.
/// Never overwrites an existing destination.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(WardenError::DestinationConflict {
            path: to.to_path_buf(),
            reason: "destination already exists".to_string(),
        });
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WardenError::file_access(parent, e))?;
    }

    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!("rename {:?} -> {:?} failed ({}), copying", from, to, rename_err);
            if let Err(e) = std::fs::copy(from, to) {
                let _ = std::fs::remove_file(to);
                return Err(WardenError::file_access(from, e));
            }
            std::fs::remove_file(from).map_err(|e| {
                let _ = std::fs::remove_file(to);
                WardenError::file_access(from, e)
            })
        }
    }
}

/// Applies actions to session records and reports them to the audit sink
pub struct ActionExecutor {
    audit: Arc<dyn AuditSink>,
    quarantine: Quarantine,
}

impl ActionExecutor {
    pub fn new(audit: Arc<dyn AuditSink>, quarantine: Quarantine) -> Self {
        Self { audit, quarantine }
    }

    pub fn quarantine(&self) -> &Quarantine {
        &self.quarantine
    }

    fn audit(&self, session_id: &str, path: &Path, action: &str, outcome: &str) {
        self.audit
            .record(&AuditEvent::new(session_id, path, action, outcome));
    }

    /// Organize records under `base`. A dry run plans with the same
    /// resolver the apply uses, so destinations agree.
    pub fn organize(
        &self,
        session_id: &str,
        records: &mut [FileRecord],
        base: &Path,
        options: &OrganizeOptions,
        dry_run: bool,
    ) -> OperationSummary {
        let mut summary = OperationSummary::new(dry_run);
        let mut planner = DestinationPlanner::new(options.duplicate_check);

        for record in records.iter_mut() {
            if !options.categories.is_empty() && !options.categories.contains(&record.category) {
                continue;
            }
            if record.status.is_terminal() {
                summary.push(skipped(record, format!("already {}", record.status)));
                continue;
            }

            let outcome = organize::organize_one(&mut planner, record, base, options, dry_run);
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Organize failed for {:?}: {}", record.path, e);
                    record.mark_failed(e.to_string());
                    failed(record, &e)
                }
            };
            if !dry_run {
                self.audit(session_id, &record.path, "organize", outcome.kind.as_str());
            }
            summary.push(outcome);
        }

        info!(
            "Organize{} for {}: {} succeeded, {} skipped, {} failed",
            if dry_run { " (dry run)" } else { "" },
            session_id,
            summary.succeeded,
            summary.skipped,
            summary.failed
        );
        summary
    }

    /// Delete records selected by `rules`. Permanent; a dry run only
    /// reports what would go and why.
    pub fn delete(
        &self,
        session_id: &str,
        records: &mut [FileRecord],
        rules: &RuleSet,
        reference: chrono::DateTime<chrono::Utc>,
        dry_run: bool,
    ) -> OperationSummary {
        let mut summary = OperationSummary::new(dry_run);

        for record in records.iter_mut() {
            let Some(reasons) = rules.match_reasons(record, reference) else {
                continue;
            };
            record.rule_match = true;
            if record.status.is_terminal() {
                summary.push(skipped(record, format!("already {}", record.status)));
                continue;
            }

            if dry_run {
                summary.push(ActionOutcome {
                    path: record.path.clone(),
                    kind: OutcomeKind::Planned,
                    destination: None,
                    size: record.size,
                    details: reasons,
                });
                continue;
            }

            let outcome = match std::fs::remove_file(&record.path) {
                Ok(()) => {
                    record.status = RecordStatus::Deleted;
                    ActionOutcome {
                        path: record.path.clone(),
                        kind: OutcomeKind::Deleted,
                        destination: None,
                        size: record.size,
                        details: reasons,
                    }
                }
                Err(e) => {
                    let err = WardenError::file_access(&record.path, e);
                    warn!("Delete failed: {}", err);
                    record.mark_failed(err.to_string());
                    failed(record, &err)
                }
            };
            self.audit(session_id, &record.path, "delete", outcome.kind.as_str());
            summary.push(outcome);
        }

        info!(
            "Delete{} for {}: {} matched, {} bytes",
            if dry_run { " (dry run)" } else { "" },
            session_id,
            summary.succeeded,
            summary.bytes_affected
        );
        summary
    }

    /// Quarantine one record as part of a batch, updating its status and
    /// hash on success
    pub fn quarantine_record(&self, session_id: &str, record: &mut FileRecord) -> ActionOutcome {
        if record.status.is_terminal() {
            return skipped(record, format!("already {}", record.status));
        }

        match self.quarantine_entry(session_id, record) {
            Ok(entry) => ActionOutcome {
                path: record.path.clone(),
                kind: OutcomeKind::Quarantined,
                destination: Some(entry.quarantine_path),
                size: record.size,
                details: vec![entry.id],
            },
            Err(e) => failed(record, &e),
        }
    }

    /// Quarantine one record and hand back its ledger entry, or the error
    /// that stopped it
    pub fn quarantine_entry(
        &self,
        session_id: &str,
        record: &mut FileRecord,
    ) -> Result<QuarantineRecord> {
        if record.status.is_terminal() {
            return Err(WardenError::InvalidState(format!(
                "{} is already {}",
                record.path.display(),
                record.status
            )));
        }

        let result = self.quarantine.quarantine_file(
            &record.path,
            record.threat,
            record.detection_method,
            record.threat_name.clone(),
            Some(session_id),
        );
        let outcome = match &result {
            Ok(entry) => {
                record.content_hash = Some(entry.content_hash.clone());
                record.status = RecordStatus::Quarantined;
                OutcomeKind::Quarantined
            }
            Err(e) => {
                warn!("Quarantine failed for {:?}: {}", record.path, e);
                record.mark_failed(e.to_string());
                OutcomeKind::Failed
            }
        };
        self.audit(session_id, &record.path, "quarantine", outcome.as_str());
        result
    }

    /// Restore or permanently delete a quarantined file
    pub fn quarantine_action(&self, record_id: &str, action: QuarantineAction) -> Result<QuarantineRecord> {
        let result = self.quarantine.apply(record_id, action);
        let (path, session, outcome) = match &result {
            Ok(entry) => (
                entry.original_path.clone(),
                entry.session_id.clone().unwrap_or_default(),
                match action {
                    QuarantineAction::Restore => OutcomeKind::Restored.as_str(),
                    QuarantineAction::Delete => OutcomeKind::Deleted.as_str(),
                },
            ),
            Err(_) => (PathBuf::from(record_id), String::new(), OutcomeKind::Failed.as_str()),
        };
        self.audit(&session, &path, action.as_str(), outcome);
        result
    }
}

fn skipped(record: &FileRecord, reason: String) -> ActionOutcome {
    ActionOutcome {
        path: record.path.clone(),
        kind: OutcomeKind::Skipped,
        destination: None,
        size: record.size,
        details: vec![reason],
    }
}

fn failed(record: &FileRecord, error: &WardenError) -> ActionOutcome {
    ActionOutcome {
        path: record.path.clone(),
        kind: OutcomeKind::Failed,
        destination: None,
        size: record.size,
        details: vec![error.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(kind: OutcomeKind, size: u64) -> ActionOutcome {
        ActionOutcome {
            path: PathBuf::from("/a"),
            kind,
            destination: None,
            size,
            details: Vec::new(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = OperationSummary::new(false);
        summary.push(outcome(OutcomeKind::Moved, 10));
        summary.push(outcome(OutcomeKind::SkippedDuplicate, 20));
        summary.push(outcome(OutcomeKind::Failed, 30));
        assert_eq!((summary.succeeded, summary.skipped, summary.failed), (1, 1, 1));
        assert_eq!(summary.bytes_affected, 10);
    }

    #[test]
    fn test_move_file_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("sub/b.txt");
        std::fs::write(&a, b"a").unwrap();
        move_file(&a, &b).unwrap();
        assert!(!a.exists());
        assert_eq!(std::fs::read(&b).unwrap(), b"a");

        std::fs::write(&a, b"again").unwrap();
        assert!(matches!(
            move_file(&a, &b),
            Err(WardenError::DestinationConflict { .. })
        ));
        assert!(a.exists());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(OutcomeKind::SkippedDuplicate.to_string(), "moved:skipped-duplicate");
        let json = serde_json::to_string(&DuplicateCheck::SizeAndHash).unwrap();
        assert_eq!(json, "\"size_and_hash\"");
    }
}
