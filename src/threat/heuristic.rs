// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scanner-free anomaly check
//!
//! Packed or encrypted executables show near-random byte distributions, and
//! droppers like to hide behind names such as `invoice.pdf.exe`. Both are
//! scored from the feature vector the scan already extracted.

use std::path::Path;
use tracing::debug;

use super::{DetectionMethod, ThreatAssessment, ThreatVerdict};
use crate::features::{extension_of, FeatureVector};

pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 0.7;

/// Entropy, in bits per byte, below which an executable scores zero
const ENTROPY_FLOOR: f64 = 4.0;
const ENTROPY_MAX: f64 = 8.0;

const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "dll", "scr", "com", "pif", "bat", "cmd", "msi", "vbs", "ps1", "jar",
];

/// Extensions a dropper pretends to be
const DECOY_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "jpg", "jpeg", "png",
    "gif", "mp3", "mp4", "zip",
];

fn is_executable(ext: &str) -> bool {
    EXECUTABLE_EXTENSIONS.contains(&ext)
}

/// `invoice.pdf.exe`: a decoy extension in front of an executable one
pub fn has_double_extension(path: &Path, ext: &str) -> bool {
    if !is_executable(ext) {
        return false;
    }
    let Some(stem) = path.file_stem() else {
        return false;
    };
    let inner = extension_of(Path::new(stem));
    DECOY_EXTENSIONS.contains(&inner.as_str())
}

#[derive(Debug, Clone, Copy)]
pub struct AnomalyHeuristic {
    threshold: f64,
}

impl Default for AnomalyHeuristic {
    fn default() -> Self {
        Self::new(DEFAULT_ANOMALY_THRESHOLD)
    }
}

impl AnomalyHeuristic {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Anomaly score in [0, 1]
    pub fn score(&self, path: &Path, features: &FeatureVector) -> f64 {
        if has_double_extension(path, &features.extension) {
            return 1.0;
        }
        if !is_executable(&features.extension) {
            return 0.0;
        }
        ((features.entropy - ENTROPY_FLOOR) / (ENTROPY_MAX - ENTROPY_FLOOR)).clamp(0.0, 1.0)
    }

    /// A suspicious assessment when the score is above the threshold
    pub fn check(&self, path: &Path, features: &FeatureVector) -> Option<ThreatAssessment> {
        let score = self.score(path, features);
        if score <= self.threshold {
            return None;
        }
        debug!("{:?} anomaly score {:.2} above {:.2}", path, score, self.threshold);

        let reason = if has_double_extension(path, &features.extension) {
            "double extension".to_string()
        } else {
            format!("high entropy executable ({:.2} bits/byte)", features.entropy)
        };
        Some(ThreatAssessment {
            verdict: ThreatVerdict::Suspicious,
            threat_name: Some(reason),
            method: Some(DetectionMethod::Heuristic),
            cloud_detections: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MimeClass;

    fn features(ext: &str, entropy: f64) -> FeatureVector {
        FeatureVector {
            size: 4096,
            extension: ext.to_string(),
            entropy,
            mime: MimeClass::Application,
            age_days: 1.0,
            path_depth: 3,
            in_temp_folder: false,
        }
    }

    #[test]
    fn test_packed_executable_is_suspicious() {
        let heuristic = AnomalyHeuristic::default();
        let path = Path::new("/data/setup.exe");

        let flagged = heuristic.check(path, &features("exe", 7.8)).unwrap();
        assert_eq!(flagged.verdict, ThreatVerdict::Suspicious);
        assert_eq!(flagged.method, Some(DetectionMethod::Heuristic));

        // Ordinary compiled code sits well below the threshold
        assert!(heuristic.check(path, &features("exe", 6.0)).is_none());
    }

    #[test]
    fn test_high_entropy_media_is_not_flagged() {
        let heuristic = AnomalyHeuristic::default();
        assert_eq!(heuristic.score(Path::new("/data/a.zip"), &features("zip", 7.99)), 0.0);
        assert!(heuristic
            .check(Path::new("/data/clip.mp4"), &features("mp4", 7.9))
            .is_none());
    }

    #[test]
    fn test_double_extension() {
        let heuristic = AnomalyHeuristic::default();
        let path = Path::new("/data/Invoice.PDF.exe");
        let flagged = heuristic.check(path, &features("exe", 1.0)).unwrap();
        assert_eq!(flagged.threat_name.as_deref(), Some("double extension"));

        assert!(!has_double_extension(Path::new("/data/archive.tar.gz"), "gz"));
        assert!(!has_double_extension(Path::new("/data/tool.v2.exe"), "exe"));
    }

    #[test]
    fn test_threshold_is_configurable() {
        // Entropy 6.8 scores 0.7
        let path = Path::new("/data/a.dll");
        assert!(AnomalyHeuristic::new(0.75).check(path, &features("dll", 6.8)).is_none());
        assert!(AnomalyHeuristic::new(0.65).check(path, &features("dll", 6.8)).is_some());
    }
}
