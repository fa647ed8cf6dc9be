// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Destination planning for organize

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{move_file, ActionOutcome, DuplicateCheck, OrganizeOptions, OutcomeKind};
use crate::features::content_hash;
use crate::record::{FileRecord, RecordStatus};
use crate::{Result, WardenError};

/// Longest file name most filesystems accept, in bytes
const MAX_NAME_BYTES: usize = 255;
const MAX_SUFFIX: u32 = 9_999;

/// `base/Category[/YYYY-MM]`
pub fn destination_dir(base: &Path, record: &FileRecord, options: &OrganizeOptions) -> PathBuf {
    let mut dir = base.join(record.category.dir_name());
    if options.dated_folders {
        dir.push(record.modified.format("%Y-%m").to_string());
    }
    dir
}

/// Where a file should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Free destination, possibly suffixed
    Target(PathBuf),
    /// An identical file already occupies the destination
    Duplicate(PathBuf),
    /// The file is already at its destination
    InPlace,
}

/// Resolves destinations for one batch.
///
/// Names handed out earlier in the batch count as occupied, so a dry run
/// (which moves nothing) resolves exactly like an apply. A claim remembers
/// the source's size and, when hashing, its hash taken at claim time; the
/// source may already have moved by the time a later file is compared.
#[derive(Debug)]
pub struct DestinationPlanner {
    check: DuplicateCheck,
    claimed: HashMap<PathBuf, Claim>,
}

#[derive(Debug, Clone)]
struct Claim {
    size: u64,
    hash: Option<String>,
}

/// Whatever holds a candidate destination
enum Occupant {
    Claimed(Claim),
    OnDisk { size: u64, path: PathBuf },
}

impl Occupant {
    fn size(&self) -> u64 {
        match self {
            Occupant::Claimed(claim) => claim.size,
            Occupant::OnDisk { size, .. } => *size,
        }
    }

    fn hash(&self) -> Result<Option<String>> {
        match self {
            Occupant::Claimed(claim) => Ok(claim.hash.clone()),
            Occupant::OnDisk { path, .. } => content_hash(path).map(Some),
        }
    }
}

impl DestinationPlanner {
    pub fn new(check: DuplicateCheck) -> Self {
        Self {
            check,
            claimed: HashMap::new(),
        }
    }

    fn occupant(&self, candidate: &Path) -> Option<Occupant> {
        if let Some(claim) = self.claimed.get(candidate) {
            return Some(Occupant::Claimed(claim.clone()));
        }
        std::fs::symlink_metadata(candidate)
            .ok()
            .map(|m| Occupant::OnDisk {
                size: m.len(),
                path: candidate.to_path_buf(),
            })
    }

    fn is_duplicate(&self, source: &Path, size: u64, occupant: &Occupant) -> Result<bool> {
        if occupant.size() != size {
            return Ok(false);
        }
        match self.check {
            DuplicateCheck::Size => Ok(true),
            DuplicateCheck::SizeAndHash => {
                let theirs = occupant.hash()?;
                Ok(theirs.is_some() && theirs == Some(content_hash(source)?))
            }
        }
    }

    /// Pick the destination for `source` inside `dir` and claim it
    pub fn resolve(&mut self, source: &Path, size: u64, dir: &Path) -> Result<Placement> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WardenError::DestinationConflict {
                path: source.to_path_buf(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;

        let candidate = dir.join(file_name);
        if candidate == source {
            return Ok(Placement::InPlace);
        }

        let Some(occupant) = self.occupant(&candidate) else {
            return self.claim(candidate, size, source);
        };
        if self.is_duplicate(source, size, &occupant)? {
            return Ok(Placement::Duplicate(candidate));
        }

        let (stem, ext) = split_name(file_name);
        for n in 1..=MAX_SUFFIX {
            let name = match ext {
                Some(ext) => format!("{}_{}.{}", stem, n, ext),
                None => format!("{}_{}", stem, n),
            };
            if name.len() > MAX_NAME_BYTES {
                return Err(WardenError::DestinationConflict {
                    path: candidate,
                    reason: format!("suffixed name exceeds {} bytes", MAX_NAME_BYTES),
                });
            }
            let suffixed = dir.join(&name);
            if self.occupant(&suffixed).is_none() {
                debug!("{:?} taken, using {:?}", candidate, suffixed);
                return self.claim(suffixed, size, source);
            }
        }

        Err(WardenError::DestinationConflict {
            path: candidate,
            reason: format!("no free name after {} attempts", MAX_SUFFIX),
        })
    }

    fn claim(&mut self, target: PathBuf, size: u64, source: &Path) -> Result<Placement> {
        if target.file_name().map(|n| n.len()).unwrap_or(0) > MAX_NAME_BYTES {
            return Err(WardenError::DestinationConflict {
                path: target,
                reason: format!("file name exceeds {} bytes", MAX_NAME_BYTES),
            });
        }
        let hash = match self.check {
            DuplicateCheck::Size => None,
            DuplicateCheck::SizeAndHash => Some(content_hash(source)?),
        };
        self.claimed.insert(target.clone(), Claim { size, hash });
        Ok(Placement::Target(target))
    }
}

/// `report.tar.gz` splits as `report.tar` + `gz`; dotfiles keep their name
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(i) => (&name[..i], Some(&name[i + 1..])),
    }
}

pub(crate) fn organize_one(
    planner: &mut DestinationPlanner,
    record: &mut FileRecord,
    base: &Path,
    options: &OrganizeOptions,
    dry_run: bool,
) -> Result<ActionOutcome> {
    let dir = destination_dir(base, record, options);
    let placement = planner.resolve(&record.path, record.size, &dir)?;

    let (kind, destination) = match placement {
        Placement::InPlace => (OutcomeKind::Skipped, Some(record.path.clone())),
        Placement::Duplicate(existing) => (OutcomeKind::SkippedDuplicate, Some(existing)),
        Placement::Target(target) if dry_run => {
            record.transition(RecordStatus::Planned)?;
            (OutcomeKind::Planned, Some(target))
        }
        Placement::Target(target) => {
            move_file(&record.path, &target)?;
            record.transition(RecordStatus::Moved)?;
            record.moved_to = Some(target.clone());
            record.error = None;
            (OutcomeKind::Moved, Some(target))
        }
    };

    Ok(ActionOutcome {
        path: record.path.clone(),
        kind,
        destination,
        size: record.size,
        details: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("report.docx"), ("report", Some("docx")));
        assert_eq!(split_name("a.tar.gz"), ("a.tar", Some("gz")));
        assert_eq!(split_name(".bashrc"), (".bashrc", None));
        assert_eq!(split_name("Makefile"), ("Makefile", None));
    }

    #[test]
    fn test_resolve_duplicate_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Documents");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("report.docx"), b"12345").unwrap();

        let src_dir = dir.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let same = src_dir.join("report.docx");
        std::fs::write(&same, b"abcde").unwrap();

        let mut planner = DestinationPlanner::new(DuplicateCheck::Size);
        assert_eq!(
            planner.resolve(&same, 5, &dest).unwrap(),
            Placement::Duplicate(dest.join("report.docx"))
        );

        let mut planner = DestinationPlanner::new(DuplicateCheck::Size);
        assert_eq!(
            planner.resolve(&same, 7, &dest).unwrap(),
            Placement::Target(dest.join("report_1.docx"))
        );
        // Claimed names are occupied for the rest of the batch
        assert_eq!(
            planner.resolve(&same, 9, &dest).unwrap(),
            Placement::Target(dest.join("report_2.docx"))
        );
    }

    #[test]
    fn test_size_and_hash_distinguishes_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Documents");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("notes.txt"), b"aaaa").unwrap();

        let src = dir.path().join("notes.txt");
        std::fs::write(&src, b"bbbb").unwrap();

        let mut planner = DestinationPlanner::new(DuplicateCheck::SizeAndHash);
        assert_eq!(
            planner.resolve(&src, 4, &dest).unwrap(),
            Placement::Target(dest.join("notes_1.txt"))
        );
    }

    #[test]
    fn test_claim_hash_survives_source_move() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Documents");
        let first = dir.path().join("a/r.txt");
        let second = dir.path().join("b/r.txt");
        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::create_dir_all(second.parent().unwrap()).unwrap();
        std::fs::write(&first, b"aaaa").unwrap();
        std::fs::write(&second, b"bbbb").unwrap();

        let mut planner = DestinationPlanner::new(DuplicateCheck::SizeAndHash);
        let target = match planner.resolve(&first, 4, &dest).unwrap() {
            Placement::Target(target) => target,
            other => panic!("unexpected {:?}", other),
        };
        std::fs::create_dir_all(&dest).unwrap();
        move_file(&first, &target).unwrap();

        assert_eq!(
            planner.resolve(&second, 4, &dest).unwrap(),
            Placement::Target(dest.join("r_1.txt"))
        );
    }

    #[test]
    fn test_overlong_name_is_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let long = format!("{}.txt", "x".repeat(251));
        let dest = dir.path().join("Documents");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join(&long), b"1").unwrap();

        let mut planner = DestinationPlanner::new(DuplicateCheck::Size);
        let err = planner
            .resolve(&dir.path().join(&long), 2, &dest)
            .unwrap_err();
        assert!(matches!(err, WardenError::DestinationConflict { .. }));
    }
}
