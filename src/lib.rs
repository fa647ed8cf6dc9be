// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Filewarden: scan, classify and safely act on files
//!
//! A scan walks a directory tree, extracts features from each file, assigns
//! a category (trained model with an extension fallback) and, when
//! configured, a threat verdict from ClamAV and VirusTotal. Finished
//! sessions can then be organized into category folders, pruned by rules or
//! have their threats moved into a reversible quarantine.

pub mod actions;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod features;
pub mod record;
pub mod report;
pub mod rules;
pub mod scan;
pub mod threat;

pub use actions::{OperationSummary, OrganizeOptions, QuarantineAction, QuarantineRecord};
pub use classifier::{Category, Classification, ClassificationMethod};
pub use config::AppConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{Result, WardenError};
pub use record::{FileRecord, RecordStatus};
pub use rules::{Rule, RuleSet};
pub use scan::{ProgressSnapshot, ScanOptions, ScanState};
pub use threat::{DetectionMethod, ThreatVerdict};
