// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Filewarden

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::actions::DuplicateCheck;
use crate::threat::ThreatVerdict;
use crate::WardenError;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    /// Traversal and feature extraction
    #[serde(default)]
    pub scan: ScanConfig,

    /// Category classification
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Threat assessment collaborators
    #[serde(default)]
    pub threat: ThreatConfig,

    /// Organize defaults
    #[serde(default)]
    pub organize: OrganizeConfig,

    /// Quarantine store
    #[serde(default)]
    pub quarantine: QuarantineConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Audit log
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScanConfig {
    /// Path prefixes that are never descended into
    #[serde(default = "default_deny_prefixes")]
    pub deny_prefixes: Vec<String>,
    /// Glob patterns for files or directories to skip
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Bytes sampled from the start of each file for entropy
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: usize,
    /// Concurrent per-file workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_true")]
    pub use_ml: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ThreatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub clamav: ClamavConfig,
    #[serde(default)]
    pub virustotal: VirusTotalConfig,
    /// Cloud detections needed before a locally-clean file becomes suspicious
    #[serde(default = "default_min_engines")]
    pub min_engine_detections: u32,
    /// Lowest verdict that session quarantine acts on
    #[serde(default = "default_quarantine_verdict")]
    pub quarantine_at: ThreatVerdict,
    /// Flag packed executables and double extensions without a scanner
    #[serde(default = "default_true")]
    pub heuristic: bool,
    /// Anomaly score above which the heuristic reports a file
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClamavConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_clamav_host")]
    pub host: String,
    #[serde(default = "default_clamav_port")]
    pub port: u16,
    #[serde(default = "default_clamav_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VirusTotalConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_virustotal_url")]
    pub url: String,
    #[serde(default = "default_virustotal_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrganizeConfig {
    #[serde(default = "default_destination")]
    pub destination_base: String,
    #[serde(default)]
    pub dated_folders: bool,
    #[serde(default)]
    pub duplicate_check: DuplicateCheck,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QuarantineConfig {
    #[serde(default = "default_quarantine_dir")]
    pub directory: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_path")]
    pub path: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_sample_bytes() -> usize { 8 * 1024 }
fn default_workers() -> usize { 4 }
fn default_model_path() -> String { "filewarden_model.json".to_string() }
fn default_confidence_threshold() -> f64 { 0.7 }
fn default_min_engines() -> u32 { 3 }
fn default_anomaly_threshold() -> f64 { 0.7 }
fn default_quarantine_verdict() -> ThreatVerdict { ThreatVerdict::High }
fn default_clamav_host() -> String { "127.0.0.1".to_string() }
fn default_clamav_port() -> u16 { 3310 }
fn default_clamav_timeout() -> u64 { 30 }
fn default_virustotal_url() -> String { "https://www.virustotal.com/api/v3".to_string() }
fn default_virustotal_timeout() -> u64 { 30 }
fn default_destination() -> String { "organized".to_string() }
fn default_quarantine_dir() -> String { "quarantine".to_string() }
fn default_db_path() -> String { "filewarden.db".to_string() }
fn default_audit_path() -> String { "filewarden_audit.jsonl".to_string() }

fn default_deny_prefixes() -> Vec<String> {
    [
        "/proc", "/sys", "/dev", "/run", "/boot", "/lost+found",
        "C:\\Windows", "C:\\System Volume Information", "C:\\$Recycle.Bin",
        "/System", "/private/var/vm",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            deny_prefixes: default_deny_prefixes(),
            exclude_patterns: Vec::new(),
            sample_bytes: default_sample_bytes(),
            workers: default_workers(),
            follow_symlinks: false,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            confidence_threshold: default_confidence_threshold(),
            use_ml: true,
        }
    }
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            clamav: ClamavConfig::default(),
            virustotal: VirusTotalConfig::default(),
            min_engine_detections: default_min_engines(),
            quarantine_at: default_quarantine_verdict(),
            heuristic: true,
            anomaly_threshold: default_anomaly_threshold(),
        }
    }
}

impl Default for ClamavConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_clamav_host(),
            port: default_clamav_port(),
            timeout_secs: default_clamav_timeout(),
        }
    }
}

impl Default for VirusTotalConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: default_virustotal_url(),
            timeout_secs: default_virustotal_timeout(),
        }
    }
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            destination_base: default_destination(),
            dated_folders: false,
            duplicate_check: DuplicateCheck::default(),
        }
    }
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            directory: default_quarantine_dir(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Self>(&content)
                .map_err(|e| WardenError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Pick up collaborator credentials and addresses from the environment
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("VIRUSTOTAL_API_KEY") {
            if !key.trim().is_empty() {
                self.threat.virustotal.api_key = Some(key);
            }
        }
        if let Ok(host) = std::env::var("CLAMAV_HOST") {
            self.threat.clamav.host = host;
        }
        if let Ok(port) = std::env::var("CLAMAV_PORT") {
            match port.parse() {
                Ok(port) => self.threat.clamav.port = port,
                Err(_) => tracing::warn!("Ignoring invalid CLAMAV_PORT {:?}", port),
            }
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let threshold = self.classifier.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(WardenError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        let anomaly = self.threat.anomaly_threshold;
        if !(0.0..=1.0).contains(&anomaly) {
            return Err(WardenError::Config(format!(
                "anomaly_threshold must be within [0, 1], got {}",
                anomaly
            )));
        }
        if self.scan.workers == 0 {
            return Err(WardenError::Config("scan.workers must be at least 1".to_string()));
        }
        if self.scan.sample_bytes == 0 {
            return Err(WardenError::Config("scan.sample_bytes must be at least 1".to_string()));
        }
        if self.quarantine.directory.trim().is_empty() {
            return Err(WardenError::Config("quarantine.directory is empty".to_string()));
        }
        for pattern in &self.scan.exclude_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                WardenError::Config(format!("Invalid exclude pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        PathBuf::from(&self.quarantine.directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.classifier.confidence_threshold, 0.7);
        assert!(config.scan.deny_prefixes.iter().any(|p| p == "/proc"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"classifier": {"confidence_threshold": 0.9}}"#).unwrap();
        assert_eq!(config.classifier.confidence_threshold, 0.9);
        assert!(config.classifier.use_ml);
        assert_eq!(config.scan.workers, 4);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.classifier.confidence_threshold = 1.5;
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));

        let mut config = AppConfig::default();
        config.threat.anomaly_threshold = -0.1;
        assert!(matches!(config.validate(), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.organize.dated_folders = true;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert!(loaded.organize.dated_folders);
    }
}
