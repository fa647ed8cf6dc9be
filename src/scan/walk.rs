// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Deterministic directory traversal
//!
//! Entries are visited depth-first in lexicographic file-name order, so two
//! walks over an unchanged tree yield the same sequence of paths.

use glob::Pattern;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::{Result, WardenError};

/// Paths that are never descended into or reported
#[derive(Debug, Clone, Default)]
pub struct WalkFilter {
    deny_prefixes: Vec<PathBuf>,
    excludes: Vec<Pattern>,
}

impl WalkFilter {
    pub fn new(deny_prefixes: &[String], exclude_patterns: &[String]) -> Result<Self> {
        let excludes = exclude_patterns
            .iter()
            .map(|glob| {
                Pattern::new(glob).map_err(|e| {
                    WardenError::Config(format!("Invalid exclude pattern '{}': {}", glob, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            deny_prefixes: deny_prefixes.iter().map(PathBuf::from).collect(),
            excludes,
        })
    }

    pub fn is_denied(&self, path: &Path) -> bool {
        self.deny_prefixes.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Patterns match either the full path or the bare file name
    pub fn is_excluded(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        self.excludes
            .iter()
            .any(|p| p.matches_path(path) || p.matches(name))
    }

    fn allows(&self, path: &Path) -> bool {
        !self.is_denied(path) && !self.is_excluded(path)
    }
}

/// Reject roots that cannot be scanned before a session is created
pub fn validate_root(root: &Path, filter: &WalkFilter) -> Result<PathBuf> {
    let metadata = std::fs::metadata(root).map_err(|e| WardenError::InvalidRoot {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !metadata.is_dir() {
        return Err(WardenError::InvalidRoot {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    if filter.is_denied(root) || filter.is_denied(&canonical) {
        return Err(WardenError::InvalidRoot {
            path: root.to_path_buf(),
            reason: "system directory cannot be scanned".to_string(),
        });
    }
    Ok(root.to_path_buf())
}

#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    pub recursive: bool,
    pub follow_symlinks: bool,
    /// Stop after this many files
    pub max_files: Option<usize>,
}

/// One step of a walk
#[derive(Debug)]
pub enum WalkEvent {
    File(PathBuf),
    /// An entry below the root could not be read
    EntryError { path: PathBuf, error: WardenError },
    /// The root itself failed; the walk stops
    RootError(WardenError),
}

/// Walk `root`, handing each event to `emit`. The walk stops early when
/// `emit` returns false or `cancel` fires.
pub fn walk<F>(
    root: &Path,
    options: WalkOptions,
    filter: &WalkFilter,
    cancel: &CancellationToken,
    mut emit: F,
) where
    F: FnMut(WalkEvent) -> bool,
{
    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = 0usize;
    let entries = walker
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || filter.allows(e.path()));

    for entry in entries {
        if cancel.is_cancelled() {
            debug!("Walk of {:?} cancelled", root);
            return;
        }

        let event = match entry {
            Ok(entry) if entry.file_type().is_file() => WalkEvent::File(entry.into_path()),
            Ok(_) => continue,
            Err(err) => {
                let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                let depth = err.depth();
                let io = err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
                if depth == 0 {
                    error!("Scan root {:?} failed: {}", path, io);
                    emit(WalkEvent::RootError(WardenError::file_access(path, io)));
                    return;
                }
                WalkEvent::EntryError {
                    error: WardenError::file_access(&path, io),
                    path,
                }
            }
        };

        let is_file = matches!(event, WalkEvent::File(_));
        if !emit(event) {
            return;
        }
        if is_file {
            files += 1;
            if options.max_files.is_some_and(|max| files >= max) {
                debug!("Reached file limit of {} under {:?}", files, root);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(root: &Path, options: WalkOptions, filter: &WalkFilter) -> Vec<PathBuf> {
        let mut out = Vec::new();
        walk(root, options, filter, &CancellationToken::new(), |event| {
            if let WalkEvent::File(p) = event {
                out.push(p);
            }
            true
        });
        out
    }

    fn tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("c.txt"), b"c").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b/nested/z.log"), b"z").unwrap();
        std::fs::write(dir.path().join("b/y.tmp"), b"y").unwrap();
        std::fs::write(dir.path().join("node_modules/dep.js"), b"d").unwrap();
        dir
    }

    const ALL: WalkOptions = WalkOptions {
        recursive: true,
        follow_symlinks: false,
        max_files: None,
    };

    #[test]
    fn test_walk_is_lexicographic_and_deterministic() {
        let dir = tree();
        let filter = WalkFilter::default();
        let first = collect(dir.path(), ALL, &filter);
        let names: Vec<String> = first
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(
            names,
            vec!["a.txt", "b/nested/z.log", "b/y.tmp", "c.txt", "node_modules/dep.js"]
        );
        assert_eq!(first, collect(dir.path(), ALL, &filter));
    }

    #[test]
    fn test_excludes_and_non_recursive() {
        let dir = tree();
        let filter = WalkFilter::new(&[], &["node_modules".to_string(), "*.tmp".to_string()]).unwrap();
        let found = collect(dir.path(), ALL, &filter);
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|p| !p.to_string_lossy().contains("node_modules")));

        let shallow = WalkOptions {
            recursive: false,
            ..ALL
        };
        assert_eq!(collect(dir.path(), shallow, &WalkFilter::default()).len(), 2);
    }

    #[test]
    fn test_deny_prefix_skips_subtree() {
        let dir = tree();
        let denied = dir.path().join("b").to_string_lossy().to_string();
        let filter = WalkFilter::new(&[denied], &[]).unwrap();
        assert_eq!(collect(dir.path(), ALL, &filter).len(), 3);
    }

    #[test]
    fn test_max_files_and_cancel() {
        let dir = tree();
        let limited = WalkOptions {
            max_files: Some(2),
            ..ALL
        };
        assert_eq!(collect(dir.path(), limited, &WalkFilter::default()).len(), 2);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut seen = 0;
        walk(dir.path(), ALL, &WalkFilter::default(), &cancel, |_| {
            seen += 1;
            true
        });
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_validate_root() {
        let dir = tree();
        assert!(validate_root(dir.path(), &WalkFilter::default()).is_ok());

        let missing = dir.path().join("missing");
        assert!(matches!(
            validate_root(&missing, &WalkFilter::default()),
            Err(WardenError::InvalidRoot { .. })
        ));

        let file = dir.path().join("a.txt");
        assert!(validate_root(&file, &WalkFilter::default()).is_err());

        let filter = WalkFilter::new(&[dir.path().to_string_lossy().to_string()], &[]).unwrap();
        assert!(validate_root(dir.path(), &filter).is_err());
    }

    #[test]
    fn test_vanished_root_reports_root_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        let mut root_errors = 0;
        walk(&gone, ALL, &WalkFilter::default(), &CancellationToken::new(), |event| {
            if matches!(event, WalkEvent::RootError(_)) {
                root_errors += 1;
            }
            true
        });
        assert_eq!(root_errors, 1);
    }
}
