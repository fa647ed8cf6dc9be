// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Threat assessment
//!
//! A local signature scanner is consulted first; a cloud hash lookup only
//! matters when the local scanner did not flag the file. Either collaborator
//! may be missing or down, in which case the verdict degrades to
//! [`ThreatVerdict::None`] with a warning rather than failing the file. The
//! entropy heuristic has the last word on files both left clean.

pub mod clamav;
pub mod heuristic;
pub mod virustotal;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ThreatConfig;
use crate::features::FeatureVector;
use crate::{Result, WardenError};

pub use clamav::ClamdClient;
pub use heuristic::AnomalyHeuristic;
pub use virustotal::{sha256_file, VirusTotalClient};

/// Ordered threat level
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThreatVerdict {
    #[default]
    None,
    Suspicious,
    High,
    /// Reserved; the built-in policy never produces it
    Critical,
}

impl ThreatVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatVerdict::None => "none",
            ThreatVerdict::Suspicious => "suspicious",
            ThreatVerdict::High => "high",
            ThreatVerdict::Critical => "critical",
        }
    }
}

impl fmt::Display for ThreatVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Clamav,
    Virustotal,
    Heuristic,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionMethod::Clamav => "clamav",
            DetectionMethod::Virustotal => "virustotal",
            DetectionMethod::Heuristic => "heuristic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    pub verdict: ThreatVerdict,
    pub threat_name: Option<String>,
    pub method: Option<DetectionMethod>,
    /// Engines that flagged the file in the cloud lookup, when one was made
    pub cloud_detections: Option<u32>,
}

impl ThreatAssessment {
    pub fn clean() -> Self {
        Self::default()
    }
}

/// Result of a local signature scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalScanResult {
    Clean,
    Infected(String),
}

/// Signature scanner running next to the engine
#[async_trait]
pub trait LocalScanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// `ThreatAssessorUnavailable` when the scanner cannot be reached,
    /// `FileAccess` when the file itself cannot be read.
    async fn scan_file(&self, path: &Path) -> Result<LocalScanResult>;
}

/// Reputation report for one content hash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudReport {
    /// False when the service has never seen the hash
    pub known: bool,
    pub malicious: u32,
    pub suspicious: u32,
}

impl CloudReport {
    pub fn detections(&self) -> u32 {
        self.malicious + self.suspicious
    }
}

/// Hash reputation service
#[async_trait]
pub trait CloudLookup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, sha256: &str) -> Result<CloudReport>;
}

/// Produces one verdict per file
#[async_trait]
pub trait ThreatAssessor: Send + Sync {
    /// Whether any collaborator is configured at all
    fn is_enabled(&self) -> bool;

    /// Only per-file errors are returned; an unreachable collaborator
    /// degrades to a clean verdict. `features` are the ones the scan
    /// extracted for `path`.
    async fn assess(&self, path: &Path, features: &FeatureVector) -> Result<ThreatAssessment>;
}

/// Assessor used when threat scanning is switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAssessor;

#[async_trait]
impl ThreatAssessor for NoopAssessor {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn assess(&self, _path: &Path, _features: &FeatureVector) -> Result<ThreatAssessment> {
        Ok(ThreatAssessment::clean())
    }
}

/// Local scanner plus optional cloud lookup and anomaly heuristic
pub struct CompositeAssessor {
    local: Option<Arc<dyn LocalScanner>>,
    cloud: Option<Arc<dyn CloudLookup>>,
    heuristic: Option<AnomalyHeuristic>,
    min_engine_detections: u32,
}

impl CompositeAssessor {
    pub fn new(
        local: Option<Arc<dyn LocalScanner>>,
        cloud: Option<Arc<dyn CloudLookup>>,
        min_engine_detections: u32,
    ) -> Self {
        Self {
            local,
            cloud,
            heuristic: None,
            min_engine_detections: min_engine_detections.max(1),
        }
    }

    pub fn with_heuristic(mut self, heuristic: AnomalyHeuristic) -> Self {
        self.heuristic = Some(heuristic);
        self
    }

    /// Build the assessor described by the configuration
    pub fn from_config(config: &ThreatConfig) -> Result<Arc<dyn ThreatAssessor>> {
        if !config.enabled {
            return Ok(Arc::new(NoopAssessor));
        }

        let local: Option<Arc<dyn LocalScanner>> = if config.clamav.enabled {
            Some(Arc::new(ClamdClient::new(
                &config.clamav.host,
                config.clamav.port,
                config.clamav.timeout_secs,
            )))
        } else {
            None
        };

        let cloud: Option<Arc<dyn CloudLookup>> = match &config.virustotal.api_key {
            Some(key) if !key.trim().is_empty() => Some(Arc::new(VirusTotalClient::new(
                &config.virustotal.url,
                key,
                config.virustotal.timeout_secs,
            )?)),
            _ => None,
        };

        if local.is_none() && cloud.is_none() {
            if config.heuristic {
                warn!("No threat scanner configured, only the entropy heuristic is active");
            } else {
                warn!("Threat scanning enabled but no scanner is configured");
            }
        }

        let mut assessor = Self::new(local, cloud, config.min_engine_detections);
        if config.heuristic {
            assessor = assessor.with_heuristic(AnomalyHeuristic::new(config.anomaly_threshold));
        }
        Ok(Arc::new(assessor))
    }

    async fn cloud_detections(&self, cloud: &dyn CloudLookup, path: &Path) -> Result<Option<u32>> {
        let owned: PathBuf = path.to_path_buf();
        let sha256 = tokio::task::spawn_blocking(move || sha256_file(&owned))
            .await
            .map_err(|e| WardenError::InvalidState(format!("hash task failed: {}", e)))??;

        match cloud.lookup(&sha256).await {
            Ok(report) if report.known => Ok(Some(report.detections())),
            Ok(_) => Ok(Some(0)),
            Err(e) => {
                warn!("{} lookup failed for {:?}: {}", cloud.name(), path, e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ThreatAssessor for CompositeAssessor {
    fn is_enabled(&self) -> bool {
        self.local.is_some() || self.cloud.is_some() || self.heuristic.is_some()
    }

    async fn assess(&self, path: &Path, features: &FeatureVector) -> Result<ThreatAssessment> {
        if let Some(local) = &self.local {
            match local.scan_file(path).await {
                Ok(LocalScanResult::Infected(name)) => {
                    debug!("{} flagged {:?} as {}", local.name(), path, name);
                    return Ok(ThreatAssessment {
                        verdict: ThreatVerdict::High,
                        threat_name: Some(name),
                        method: Some(DetectionMethod::Clamav),
                        cloud_detections: None,
                    });
                }
                Ok(LocalScanResult::Clean) => {}
                Err(e @ WardenError::FileAccess { .. }) => return Err(e),
                Err(e) => warn!("{} unavailable for {:?}: {}", local.name(), path, e),
            }
        }

        let detections = match &self.cloud {
            Some(cloud) => self.cloud_detections(cloud.as_ref(), path).await?,
            None => None,
        };
        if let Some(count) = detections {
            if count >= self.min_engine_detections {
                return Ok(ThreatAssessment {
                    verdict: ThreatVerdict::Suspicious,
                    threat_name: Some(format!("{} engine detections", count)),
                    method: Some(DetectionMethod::Virustotal),
                    cloud_detections: Some(count),
                });
            }
        }

        let flagged = self
            .heuristic
            .as_ref()
            .and_then(|heuristic| heuristic.check(path, features));
        Ok(ThreatAssessment {
            cloud_detections: detections,
            ..flagged.unwrap_or_else(ThreatAssessment::clean)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MimeClass;

    struct FakeLocal(Result<LocalScanResult>);

    #[async_trait]
    impl LocalScanner for FakeLocal {
        fn name(&self) -> &'static str {
            "fake-local"
        }

        async fn scan_file(&self, _path: &Path) -> Result<LocalScanResult> {
            match &self.0 {
                Ok(r) => Ok(r.clone()),
                Err(_) => Err(WardenError::ThreatAssessorUnavailable("down".into())),
            }
        }
    }

    struct FakeCloud(Option<CloudReport>);

    #[async_trait]
    impl CloudLookup for FakeCloud {
        fn name(&self) -> &'static str {
            "fake-cloud"
        }

        async fn lookup(&self, _sha256: &str) -> Result<CloudReport> {
            self.0
                .clone()
                .ok_or_else(|| WardenError::ThreatAssessorUnavailable("quota".into()))
        }
    }

    fn report(malicious: u32) -> CloudReport {
        CloudReport {
            known: true,
            malicious,
            suspicious: 0,
        }
    }

    fn assessor(local: Result<LocalScanResult>, cloud: Option<CloudReport>) -> CompositeAssessor {
        CompositeAssessor::new(
            Some(Arc::new(FakeLocal(local))),
            Some(Arc::new(FakeCloud(cloud))),
            3,
        )
    }

    fn plain() -> FeatureVector {
        features("bin", 3.0)
    }

    fn features(ext: &str, entropy: f64) -> FeatureVector {
        FeatureVector {
            size: 18,
            extension: ext.to_string(),
            entropy,
            mime: MimeClass::Application,
            age_days: 0.0,
            path_depth: 3,
            in_temp_folder: false,
        }
    }

    fn sample_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"not really malware").unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_local_detection_is_high_regardless_of_cloud() {
        let (_dir, path) = sample_file();
        let result = assessor(Ok(LocalScanResult::Infected("Eicar-Test".into())), Some(report(0)))
            .assess(&path, &plain())
            .await
            .unwrap();
        assert_eq!(result.verdict, ThreatVerdict::High);
        assert_eq!(result.method, Some(DetectionMethod::Clamav));
        assert_eq!(result.threat_name.as_deref(), Some("Eicar-Test"));
    }

    #[tokio::test]
    async fn test_cloud_threshold_makes_suspicious() {
        let (_dir, path) = sample_file();
        let flagged = assessor(Ok(LocalScanResult::Clean), Some(report(3)))
            .assess(&path, &plain())
            .await
            .unwrap();
        assert_eq!(flagged.verdict, ThreatVerdict::Suspicious);

        let below = assessor(Ok(LocalScanResult::Clean), Some(report(2)))
            .assess(&path, &plain())
            .await
            .unwrap();
        assert_eq!(below.verdict, ThreatVerdict::None);
        assert_eq!(below.cloud_detections, Some(2));
    }

    #[tokio::test]
    async fn test_unavailable_collaborators_degrade_to_none() {
        let (_dir, path) = sample_file();
        let result = assessor(Err(WardenError::ThreatAssessorUnavailable("x".into())), None)
            .assess(&path, &plain())
            .await
            .unwrap();
        assert_eq!(result.verdict, ThreatVerdict::None);
        assert_eq!(result.cloud_detections, None);
    }

    #[tokio::test]
    async fn test_heuristic_flags_what_scanners_missed() {
        let (_dir, path) = sample_file();
        let packed = features("exe", 7.9);

        let result = assessor(Ok(LocalScanResult::Clean), Some(report(1)))
            .with_heuristic(AnomalyHeuristic::default())
            .assess(&path, &packed)
            .await
            .unwrap();
        assert_eq!(result.verdict, ThreatVerdict::Suspicious);
        assert_eq!(result.method, Some(DetectionMethod::Heuristic));
        assert_eq!(result.cloud_detections, Some(1));

        // Signature hits still win
        let result = assessor(Ok(LocalScanResult::Infected("Packed.Gen".into())), None)
            .with_heuristic(AnomalyHeuristic::default())
            .assess(&path, &packed)
            .await
            .unwrap();
        assert_eq!(result.method, Some(DetectionMethod::Clamav));
    }

    #[tokio::test]
    async fn test_heuristic_alone_enables_assessor() {
        let (_dir, path) = sample_file();
        let only = CompositeAssessor::new(None, None, 3).with_heuristic(AnomalyHeuristic::default());
        assert!(only.is_enabled());
        assert!(!CompositeAssessor::new(None, None, 3).is_enabled());

        let clean = only.assess(&path, &features("exe", 5.0)).await.unwrap();
        assert_eq!(clean.verdict, ThreatVerdict::None);
    }

    #[test]
    fn test_from_config_wires_heuristic() {
        let config = ThreatConfig {
            enabled: true,
            clamav: crate::config::ClamavConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(CompositeAssessor::from_config(&config).unwrap().is_enabled());

        let config = ThreatConfig {
            heuristic: false,
            ..config
        };
        assert!(!CompositeAssessor::from_config(&config).unwrap().is_enabled());
    }

    #[tokio::test]
    async fn test_noop_is_disabled() {
        assert!(!NoopAssessor.is_enabled());
        let verdict = NoopAssessor.assess(Path::new("/nope"), &plain()).await.unwrap();
        assert_eq!(verdict.verdict, ThreatVerdict::None);
    }

    #[test]
    fn test_verdict_ordering() {
        assert!(ThreatVerdict::None < ThreatVerdict::Suspicious);
        assert!(ThreatVerdict::High < ThreatVerdict::Critical);
        let parsed: ThreatVerdict = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, ThreatVerdict::High);
    }
}
