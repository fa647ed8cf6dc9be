// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! VirusTotal v3 hash lookup client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::{CloudLookup, CloudReport};
use crate::{Result, WardenError};

/// VirusTotal API client
pub struct VirusTotalClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct FileResponse {
    data: FileData,
}

#[derive(Deserialize)]
struct FileData {
    attributes: FileAttributes,
}

#[derive(Deserialize)]
struct FileAttributes {
    #[serde(default)]
    last_analysis_stats: AnalysisStats,
}

#[derive(Deserialize, Default)]
struct AnalysisStats {
    #[serde(default)]
    malicious: u32,
    #[serde(default)]
    suspicious: u32,
}

impl VirusTotalClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Fetch the report for a SHA-256 digest
    pub async fn file_report(&self, sha256: &str) -> Result<CloudReport> {
        let url = format!("{}/files/{}", self.base_url, sha256);
        debug!("Querying VirusTotal for {}", sha256);

        let response = self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                WardenError::ThreatAssessorUnavailable(format!(
                    "Cannot reach VirusTotal at {}: {}",
                    self.base_url, e
                ))
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(CloudReport::default()),
            StatusCode::TOO_MANY_REQUESTS => Err(WardenError::ThreatAssessorUnavailable(
                "VirusTotal quota exhausted".to_string(),
            )),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                WardenError::ThreatAssessorUnavailable("VirusTotal rejected the API key".to_string()),
            ),
            status if !status.is_success() => Err(WardenError::ThreatAssessorUnavailable(format!(
                "VirusTotal returned {}",
                status
            ))),
            _ => {
                let body = response.text().await?;
                parse_report(&body)
            }
        }
    }
}

pub fn parse_report(body: &str) -> Result<CloudReport> {
    let parsed: FileResponse = serde_json::from_str(body)?;
    let stats = parsed.data.attributes.last_analysis_stats;
    Ok(CloudReport {
        known: true,
        malicious: stats.malicious,
        suspicious: stats.suspicious,
    })
}

#[async_trait]
impl CloudLookup for VirusTotalClient {
    fn name(&self) -> &'static str {
        "virustotal"
    }

    async fn lookup(&self, sha256: &str) -> Result<CloudReport> {
        self.file_report(sha256).await
    }
}

/// Streamed SHA-256 of a file, hex encoded
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| WardenError::file_access(path, e))?;
    let mut hasher = Sha256::new();
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
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report() {
        let body = r#"{"data":{"id":"abc","attributes":{"last_analysis_stats":
            {"harmless":60,"malicious":4,"suspicious":1,"undetected":10}}}}"#;
        let report = parse_report(body).unwrap();
        assert!(report.known);
        assert_eq!(report.detections(), 5);
    }

    #[test]
    fn test_parse_report_without_stats() {
        let report = parse_report(r#"{"data":{"attributes":{}}}"#).unwrap();
        assert_eq!(report.detections(), 0);
    }

    #[test]
    fn test_sha256_known_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_base_url_normalized() {
        let client = VirusTotalClient::new("https://example.test/api/v3/", "k", 5).unwrap();
        assert_eq!(client.base_url, "https://example.test/api/v3");
    }
}
