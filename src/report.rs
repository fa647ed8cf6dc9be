// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Scan summaries and CSV export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::classifier::{Category, ClassificationMethod, LabeledSample};
use crate::db::ScanHistoryEntry;
use crate::features::{FeatureVector, MimeClass};
use crate::record::FileRecord;
use crate::scan::{ScanFailure, ScanSession, ScanState};
use crate::threat::ThreatVerdict;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub category: Category,
    pub files: u64,
    pub bytes: u64,
}

/// Summary of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub session_id: String,
    pub root: String,
    pub state: ScanState,
    pub files: u64,
    pub bytes: u64,
    pub duration_secs: f64,
    pub categories: Vec<CategoryBreakdown>,
    pub model_classified: u64,
    pub rule_matches: u64,
    /// Records per verdict above `none`
    pub threats: BTreeMap<ThreatVerdict, u64>,
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn from_session(session: &ScanSession) -> Self {
        let records = session.records();
        let snapshot = session.snapshot();

        let mut categories: BTreeMap<Category, CategoryBreakdown> = BTreeMap::new();
        let mut threats = BTreeMap::new();
        let mut model_classified = 0;
        let mut rule_matches = 0;
        let mut bytes = 0;

        for record in &records {
            let entry = categories
                .entry(record.category)
                .or_insert_with(|| CategoryBreakdown {
                    category: record.category,
                    files: 0,
                    bytes: 0,
                });
            entry.files += 1;
            entry.bytes += record.size;
            bytes += record.size;

            if record.method == ClassificationMethod::Model {
                model_classified += 1;
            }
            if record.rule_match {
                rule_matches += 1;
            }
            if record.threat > ThreatVerdict::None {
                *threats.entry(record.threat).or_insert(0) += 1;
            }
        }

        let mut categories: Vec<CategoryBreakdown> = categories.into_values().collect();
        categories.sort_by(|a, b| b.files.cmp(&a.files).then(a.category.cmp(&b.category)));

        Self {
            session_id: session.id().to_string(),
            root: session.root().display().to_string(),
            state: snapshot.state,
            files: records.len() as u64,
            bytes,
            duration_secs: snapshot.elapsed_secs,
            categories,
            model_classified,
            rule_matches,
            threats,
            failures: session.failures(),
        }
    }

    /// Row for the scan history table
    pub fn history_entry(&self) -> ScanHistoryEntry {
        let categories: serde_json::Map<String, serde_json::Value> = self
            .categories
            .iter()
            .map(|c| (c.category.dir_name().to_lowercase(), serde_json::json!(c.files)))
            .collect();
        ScanHistoryEntry {
            session_id: self.session_id.clone(),
            root: self.root.clone(),
            state: self.state.to_string(),
            files: self.files,
            bytes: self.bytes,
            failures: self.failures.len() as u64,
            categories: serde_json::Value::Object(categories),
            duration_secs: self.duration_secs,
            finished_at: Utc::now(),
        }
    }
}

/// Flat CSV row, one per record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvRow {
    path: String,
    name: String,
    extension: String,
    size: u64,
    modified: DateTime<Utc>,
    category: Category,
    confidence: f64,
    method: ClassificationMethod,
    entropy: f64,
    threat: ThreatVerdict,
    status: String,
    #[serde(default)]
    content_hash: String,
}

impl From<&FileRecord> for CsvRow {
    fn from(record: &FileRecord) -> Self {
        Self {
            path: record.path.display().to_string(),
            name: record
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            extension: record.extension.clone(),
            size: record.size,
            modified: record.modified,
            category: record.category,
            confidence: record.confidence,
            method: record.method,
            entropy: record.entropy,
            threat: record.threat,
            status: record.status.to_string(),
            content_hash: record.content_hash.clone().unwrap_or_default(),
        }
    }
}

/// Write records as CSV with a header row
pub fn write_csv<W: Write>(records: &[FileRecord], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(CsvRow::from(record))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_csv(records: &[FileRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    write_csv(records, file)
}

/// Labelled samples from an exported scan, for offline training.
/// Ages are measured against `reference`.
pub fn load_training_csv(path: &Path, reference: DateTime<Utc>) -> Result<Vec<LabeledSample>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut samples = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let row = row?;
        let file_path = Path::new(&row.path);
        let features = FeatureVector {
            size: row.size,
            extension: row.extension,
            entropy: row.entropy,
            mime: MimeClass::guess(file_path),
            age_days: (reference - row.modified).num_seconds() as f64 / 86_400.0,
            path_depth: file_path.components().count(),
            in_temp_folder: false,
        };
        samples.push(LabeledSample {
            features,
            label: row.category,
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification;
    use crate::features::ExtractedFile;
    use std::path::PathBuf;

    fn record(name: &str, size: u64) -> FileRecord {
        let path = PathBuf::from(format!("/data/{}", name));
        let features = FeatureVector {
            size,
            extension: crate::features::extension_of(&path),
            entropy: 4.5,
            mime: MimeClass::guess(&path),
            age_days: 1.0,
            path_depth: 3,
            in_temp_folder: false,
        };
        let file = ExtractedFile {
            path,
            size,
            modified: Utc::now(),
            features,
        };
        FileRecord::new(&file, Classification::heuristic(&file.features))
    }

    #[test]
    fn test_csv_export_and_training_import() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("out/scan.csv");
        let records = vec![record("a.txt", 10), record("b.png", 2000), record("c, d.rs", 30)];
        export_csv(&records, &csv_path).unwrap();

        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(text.starts_with("path,name,extension,size"));
        assert_eq!(text.lines().count(), 4);

        let samples = load_training_csv(&csv_path, Utc::now()).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[1].label, Category::Images);
        assert_eq!(samples[2].features.extension, "rs");
    }

    #[test]
    fn test_report_breakdown() {
        let session = ScanSession::new(
            "s1".into(),
            PathBuf::from("/data"),
            crate::scan::ScanOptions::default(),
        );
        session.push_record(record("a.txt", 10));
        session.push_record(record("b.txt", 20));
        session.push_record(record("c.png", 5));

        let report = ScanReport::from_session(&session);
        assert_eq!(report.files, 3);
        assert_eq!(report.bytes, 35);
        assert_eq!(report.categories[0].category, Category::Documents);
        assert_eq!(report.categories[0].bytes, 30);
        assert_eq!(report.history_entry().categories["documents"], 2);
    }
}
