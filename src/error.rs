// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Filewarden

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Filewarden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Filewarden error types
#[derive(Error, Debug)]
pub enum WardenError {
    /// A single file could not be read (permission denied, vanished mid-scan).
    #[error("Cannot access {path}: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("An operation is already running (session {active})")]
    ScanAlreadyRunning { active: String },

    #[error("Classification model unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("Threat assessor unavailable: {0}")]
    ThreatAssessorUnavailable(String),

    #[error("Destination conflict at {path}: {reason}")]
    DestinationConflict { path: PathBuf, reason: String },

    /// Quarantine move and ledger write could not be kept consistent.
    #[error("Quarantine integrity error: {0}")]
    QuarantineIntegrity(String),

    #[error("Scan session not found: {0}")]
    SessionNotFound(String),

    #[error("Quarantine record not found: {0}")]
    RecordNotFound(String),

    #[error("Invalid scan root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl WardenError {
    /// Wrap an I/O error raised while touching one particular file.
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_access_names_the_path() {
        let err = WardenError::file_access(
            "/tmp/gone.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/gone.txt"));
        assert!(std::error::Error::source(&err).is_some());

        let err = WardenError::ScanAlreadyRunning { active: "abc".into() };
        assert!(err.to_string().contains("abc"));
    }
}
