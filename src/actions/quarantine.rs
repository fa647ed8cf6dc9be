// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reversible quarantine
//!
//! Quarantining is two-phase: the file is moved first, then the record is
//! committed to the store. If the commit fails the move is undone, so a file
//! is never left in the quarantine directory without a record pointing at it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::move_file;
use crate::features::content_hash;
use crate::threat::{DetectionMethod, ThreatVerdict};
use crate::{Result, WardenError};

/// Persisted link between an original path and its quarantined copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: String,
    pub original_path: PathBuf,
    pub quarantine_path: PathBuf,
    pub size: u64,
    pub content_hash: String,
    pub detection_method: DetectionMethod,
    pub verdict: ThreatVerdict,
    pub threat_name: Option<String>,
    pub session_id: Option<String>,
    pub quarantined_at: DateTime<Utc>,
}

/// Where quarantine records live
pub trait QuarantineStore: Send + Sync {
    fn insert(&self, record: &QuarantineRecord) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<QuarantineRecord>>;

    fn remove(&self, id: &str) -> Result<()>;

    /// Newest first
    fn list(&self) -> Result<Vec<QuarantineRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineAction {
    Restore,
    Delete,
}

impl QuarantineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuarantineAction::Restore => "restore",
            QuarantineAction::Delete => "delete",
        }
    }
}

impl fmt::Display for QuarantineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collision-resistant name derived from the original path
pub fn quarantine_name(original: &Path) -> String {
    let digest = blake3::hash(original.to_string_lossy().as_bytes()).to_hex();
    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    format!("{}_{}", &digest[..16], file_name)
}

/// Quarantine directory plus its record store
#[derive(Clone)]
pub struct Quarantine {
    dir: PathBuf,
    store: Arc<dyn QuarantineStore>,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>, store: Arc<dyn QuarantineStore>) -> Self {
        Self {
            dir: dir.into(),
            store,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn free_path(&self, original: &Path) -> PathBuf {
        let name = quarantine_name(original);
        let mut path = self.dir.join(&name);
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}.{}", name, n));
            n += 1;
        }
        path
    }

    /// Move `path` into quarantine and commit its record
    pub fn quarantine_file(
        &self,
        path: &Path,
        verdict: ThreatVerdict,
        detection_method: Option<DetectionMethod>,
        threat_name: Option<String>,
        session_id: Option<&str>,
    ) -> Result<QuarantineRecord> {
        let metadata = std::fs::metadata(path).map_err(|e| WardenError::file_access(path, e))?;
        let hash = content_hash(path)?;

        std::fs::create_dir_all(&self.dir).map_err(|e| WardenError::file_access(&self.dir, e))?;
        let target = self.free_path(path);

        let record = QuarantineRecord {
            id: Uuid::new_v4().to_string(),
            original_path: path.to_path_buf(),
            quarantine_path: target.clone(),
            size: metadata.len(),
            content_hash: hash,
            detection_method: detection_method.unwrap_or(DetectionMethod::Heuristic),
            verdict,
            threat_name,
            session_id: session_id.map(String::from),
            quarantined_at: Utc::now(),
        };

        move_file(path, &target)?;

        if let Err(commit_err) = self.store.insert(&record) {
            error!("Quarantine record for {:?} not written: {}", path, commit_err);
            return match move_file(&target, path) {
                Ok(()) => Err(WardenError::QuarantineIntegrity(format!(
                    "record write failed for {}, file returned: {}",
                    path.display(),
                    commit_err
                ))),
                Err(rollback_err) => Err(WardenError::QuarantineIntegrity(format!(
                    "record write failed for {} ({}) and rollback failed ({}); file is at {}",
                    path.display(),
                    commit_err,
                    rollback_err,
                    target.display()
                ))),
            };
        }

        set_readonly(&target, true);
        info!("Quarantined {:?} as {}", path, record.id);
        Ok(record)
    }

    fn lookup(&self, id: &str) -> Result<QuarantineRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| WardenError::RecordNotFound(id.to_string()))
    }

    /// Move a quarantined file back and drop its record
    pub fn restore(&self, id: &str) -> Result<QuarantineRecord> {
        let record = self.lookup(id)?;
        if record.original_path.exists() {
            return Err(WardenError::DestinationConflict {
                path: record.original_path.clone(),
                reason: "original location is occupied".to_string(),
            });
        }

        set_readonly(&record.quarantine_path, false);
        move_file(&record.quarantine_path, &record.original_path)?;

        if let Err(e) = self.store.remove(id) {
            // keep file and record together
            if let Err(back) = move_file(&record.original_path, &record.quarantine_path) {
                return Err(WardenError::QuarantineIntegrity(format!(
                    "record {} not removed ({}) and file could not be returned ({})",
                    id, e, back
                )));
            }
            set_readonly(&record.quarantine_path, true);
            return Err(WardenError::QuarantineIntegrity(format!(
                "record {} not removed, restore undone: {}",
                id, e
            )));
        }

        info!("Restored {:?} from quarantine", record.original_path);
        Ok(record)
    }

    /// Permanently delete a quarantined file and its record
    pub fn delete(&self, id: &str) -> Result<QuarantineRecord> {
        let record = self.lookup(id)?;
        set_readonly(&record.quarantine_path, false);
        match std::fs::remove_file(&record.quarantine_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Quarantined file {:?} already gone", record.quarantine_path);
            }
            Err(e) => return Err(WardenError::file_access(&record.quarantine_path, e)),
        }
        self.store.remove(id)?;
        info!("Deleted quarantined file {:?}", record.original_path);
        Ok(record)
    }

    pub fn apply(&self, id: &str, action: QuarantineAction) -> Result<QuarantineRecord> {
        match action {
            QuarantineAction::Restore => self.restore(id),
            QuarantineAction::Delete => self.delete(id),
        }
    }

    pub fn list(&self) -> Result<Vec<QuarantineRecord>> {
        self.store.list()
    }

    /// Quarantined files per threat name
    pub fn threat_summary(&self) -> Result<BTreeMap<String, usize>> {
        let mut summary = BTreeMap::new();
        for record in self.store.list()? {
            let name = record.threat_name.unwrap_or_else(|| "unknown".to_string());
            *summary.entry(name).or_insert(0) += 1;
        }
        Ok(summary)
    }
}

fn set_readonly(path: &Path, readonly: bool) {
    let result = std::fs::metadata(path).and_then(|m| {
        let mut perms = m.permissions();
        perms.set_readonly(readonly);
        std::fs::set_permissions(path, perms)
    });
    if let Err(e) = result {
        warn!("Cannot change permissions of {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_quarantine_name_is_stable_and_path_derived() {
        let a = quarantine_name(Path::new("/home/u/a/evil.exe"));
        let b = quarantine_name(Path::new("/home/u/b/evil.exe"));
        assert_ne!(a, b);
        assert!(a.ends_with("_evil.exe"));
        assert_eq!(a, quarantine_name(Path::new("/home/u/a/evil.exe")));
    }

    #[test]
    fn test_delete_removes_file_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        std::fs::write(&file, b"payload").unwrap();

        let db = Arc::new(Database::in_memory().unwrap());
        let quarantine = Quarantine::new(dir.path().join("q"), db.clone());
        let record = quarantine
            .quarantine_file(&file, ThreatVerdict::High, Some(DetectionMethod::Clamav), Some("Eicar".into()), None)
            .unwrap();
        assert!(!file.exists());
        assert!(record.quarantine_path.exists());
        assert_eq!(quarantine.threat_summary().unwrap().get("Eicar"), Some(&1));

        quarantine.delete(&record.id).unwrap();
        assert!(!record.quarantine_path.exists());
        assert!(quarantine.list().unwrap().is_empty());
        assert!(matches!(
            quarantine.restore(&record.id),
            Err(WardenError::RecordNotFound(_))
        ));
    }

    #[test]
    fn test_restore_refuses_occupied_original() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc.txt");
        std::fs::write(&file, b"original").unwrap();

        let db = Arc::new(Database::in_memory().unwrap());
        let quarantine = Quarantine::new(dir.path().join("q"), db);
        let record = quarantine
            .quarantine_file(&file, ThreatVerdict::Suspicious, None, None, Some("s1"))
            .unwrap();
        assert_eq!(record.detection_method, DetectionMethod::Heuristic);

        std::fs::write(&file, b"newcomer").unwrap();
        assert!(matches!(
            quarantine.restore(&record.id),
            Err(WardenError::DestinationConflict { .. })
        ));
        assert_eq!(quarantine.list().unwrap().len(), 1);
    }
}
