// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Per-file feature extraction
//!
//! Everything here works from metadata plus a bounded prefix sample, so a
//! multi-gigabyte file costs the same as a small one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::{Result, WardenError};

/// Coarse MIME family derived from the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeClass {
    Text,
    Image,
    Audio,
    Video,
    Application,
    Unknown,
}

impl MimeClass {
    pub const ALL: [MimeClass; 6] = [
        MimeClass::Text,
        MimeClass::Image,
        MimeClass::Audio,
        MimeClass::Video,
        MimeClass::Application,
        MimeClass::Unknown,
    ];

    pub fn guess(path: &Path) -> Self {
        match mime_guess::from_path(path).first() {
            Some(mime) => match mime.type_().as_str() {
                "text" => MimeClass::Text,
                "image" => MimeClass::Image,
                "audio" => MimeClass::Audio,
                "video" => MimeClass::Video,
                "application" => MimeClass::Application,
                _ => MimeClass::Unknown,
            },
            None => MimeClass::Unknown,
        }
    }
}

/// Fixed-shape description of one file, the classifier's only input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub size: u64,
    /// Lowercase extension without the leading dot, empty if none
    pub extension: String,
    /// Shannon entropy of the sampled prefix, bits per byte
    pub entropy: f64,
    pub mime: MimeClass,
    /// Days between last modification and the reference time
    pub age_days: f64,
    pub path_depth: usize,
    pub in_temp_folder: bool,
}

/// Number of entries produced by [`FeatureVector::numeric`]
pub const NUMERIC_FEATURES: usize = 6 + MimeClass::ALL.len();

impl FeatureVector {
    /// Numeric projection used by trained models. The extension is handled
    /// separately as a categorical feature.
    pub fn numeric(&self) -> [f64; NUMERIC_FEATURES] {
        let mut out = [0.0; NUMERIC_FEATURES];
        out[0] = (self.size as f64).ln_1p();
        out[1] = self.entropy;
        out[2] = self.age_days.max(0.0).ln_1p();
        out[3] = self.path_depth as f64;
        out[4] = if self.in_temp_folder { 1.0 } else { 0.0 };
        out[5] = if self.extension.is_empty() { 0.0 } else { 1.0 };
        for (i, class) in MimeClass::ALL.iter().enumerate() {
            if *class == self.mime {
                out[6 + i] = 1.0;
            }
        }
        out
    }
}

/// A file that was successfully read, with the metadata the rest of the engine needs
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub features: FeatureVector,
}

/// Source of feature vectors
pub trait FeatureExtractor: Send + Sync {
    /// Read metadata and a bounded sample of `path`. Ages are measured
    /// against `reference`, normally the scan start time.
    fn extract(&self, path: &Path, reference: DateTime<Utc>) -> Result<ExtractedFile>;
}

/// Extractor backed by the local filesystem
#[derive(Debug, Clone)]
pub struct FsFeatureExtractor {
    sample_bytes: usize,
}

impl FsFeatureExtractor {
    pub fn new(sample_bytes: usize) -> Self {
        Self {
            sample_bytes: sample_bytes.max(1),
        }
    }
}

impl Default for FsFeatureExtractor {
    fn default() -> Self {
        Self::new(8 * 1024)
    }
}

impl FeatureExtractor for FsFeatureExtractor {
    fn extract(&self, path: &Path, reference: DateTime<Utc>) -> Result<ExtractedFile> {
        let metadata = std::fs::metadata(path).map_err(|e| WardenError::file_access(path, e))?;
        if !metadata.is_file() {
            return Err(WardenError::file_access(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(reference);

        let sample = read_sample(path, self.sample_bytes)?;
        let age_days = (reference - modified).num_seconds() as f64 / 86_400.0;

        let features = FeatureVector {
            size: metadata.len(),
            extension: extension_of(path),
            entropy: shannon_entropy(&sample),
            mime: MimeClass::guess(path),
            age_days,
            path_depth: path.components().count(),
            in_temp_folder: in_temp_folder(path),
        };

        Ok(ExtractedFile {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified,
            features,
        })
    }
}

fn read_sample(path: &Path, limit: usize) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|e| WardenError::file_access(path, e))?;
    let mut sample = Vec::with_capacity(limit.min(64 * 1024));
    file.take(limit as u64)
        .read_to_end(&mut sample)
        .map_err(|e| WardenError::file_access(path, e))?;
    Ok(sample)
}

/// Shannon entropy in bits per byte (0.0 - 8.0)
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0usize; 256];
    for byte in data {
        counts[*byte as usize] += 1;
    }

    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Full-content BLAKE3 hash, streamed in fixed-size chunks
pub fn content_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| WardenError::file_access(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| WardenError::file_access(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Lowercase extension without the dot
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Normalise user-supplied extensions: ".TMP", "tmp" and " .tmp" are equal
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

pub fn in_temp_folder(path: &Path) -> bool {
    path.parent()
        .map(|p| {
            p.components().any(|c| {
                let part = c.as_os_str().to_string_lossy().to_lowercase();
                matches!(part.as_str(), "temp" | "tmp" | "cache" | ".cache")
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(shannon_entropy(&[7u8; 1024]), 0.0);

        let uniform: Vec<u8> = (0..=255u8).collect();
        assert!((shannon_entropy(&uniform) - 8.0).abs() < 1e-9);

        let two = [0u8, 1, 0, 1];
        assert!((shannon_entropy(&two) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_reads_bounded_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Report.PDF");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[0u8; 4096]).unwrap();
        let random: Vec<u8> = (0..8192u32).map(|i| (i * 31 % 256) as u8).collect();
        file.write_all(&random).unwrap();
        drop(file);

        // Only the zero-filled prefix is sampled
        let extracted = FsFeatureExtractor::new(1024)
            .extract(&path, Utc::now())
            .unwrap();
        assert_eq!(extracted.size, 4096 + 8192);
        assert_eq!(extracted.features.extension, "pdf");
        assert_eq!(extracted.features.entropy, 0.0);
        assert_eq!(extracted.features.mime, MimeClass::Application);
    }

    #[test]
    fn test_missing_file_is_file_access_error() {
        let err = FsFeatureExtractor::default()
            .extract(Path::new("/definitely/not/here.txt"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, WardenError::FileAccess { .. }));
    }

    #[test]
    fn test_content_hash_stable() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".TMP"), "tmp");
        assert_eq!(normalize_extension(" log "), "log");
        assert_eq!(extension_of(Path::new("/a/b/archive.tar.GZ")), "gz");
        assert_eq!(extension_of(Path::new("/a/Makefile")), "");
    }

    #[test]
    fn test_temp_folder_detection() {
        assert!(in_temp_folder(Path::new("/home/u/tmp/x.txt")));
        assert!(!in_temp_folder(Path::new("/home/u/docs/tmp.txt")));
    }
}
