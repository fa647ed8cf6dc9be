// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! User rule sets for deletion and quarantine eligibility
//!
//! A [`Rule`] is one group of predicates joined with AND; a [`RuleSet`]
//! joins its groups with OR. Evaluation is pure: no I/O, and ages are taken
//! relative to the scan start passed in by the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::normalize_extension;
use crate::record::FileRecord;

/// One AND-group of predicates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Matching extensions, with or without the leading dot
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub older_than_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newer_than_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_below_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_above_bytes: Option<u64>,
    /// Minimum sampled entropy, bits per byte
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_entropy: Option<f64>,
}

impl Rule {
    /// A group without predicates never matches
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
            && self.older_than_days.is_none()
            && self.newer_than_days.is_none()
            && self.size_below_bytes.is_none()
            && self.size_above_bytes.is_none()
            && self.min_entropy.is_none()
    }

    /// Reasons for the match when every predicate holds, `None` otherwise
    pub fn evaluate(&self, record: &FileRecord, scan_start: DateTime<Utc>) -> Option<Vec<String>> {
        if self.is_empty() {
            return None;
        }

        let age = record.age_days(scan_start);
        let mut checks: Vec<(bool, String)> = Vec::new();

        if !self.extensions.is_empty() {
            let ext = normalize_extension(&record.extension);
            let hit = self.extensions.iter().any(|e| normalize_extension(e) == ext);
            checks.push((hit, format!("extension .{}", ext)));
        }
        if let Some(days) = self.older_than_days {
            checks.push((age > days as f64, format!("older than {} days", days)));
        }
        if let Some(days) = self.newer_than_days {
            checks.push((age < days as f64, format!("newer than {} days", days)));
        }
        if let Some(limit) = self.size_below_bytes {
            checks.push((record.size < limit, format!("size {} below {} bytes", record.size, limit)));
        }
        if let Some(limit) = self.size_above_bytes {
            checks.push((record.size > limit, format!("size {} above {} bytes", record.size, limit)));
        }
        if let Some(min) = self.min_entropy {
            checks.push((
                record.entropy >= min,
                format!("entropy {:.2} at least {:.2}", record.entropy, min),
            ));
        }

        if checks.iter().all(|(ok, _)| *ok) {
            Some(checks.into_iter().map(|(_, reason)| reason).collect())
        } else {
            None
        }
    }
}

/// OR-combination of rule groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub groups: Vec<Rule>,
}

impl RuleSet {
    pub fn new(groups: Vec<Rule>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Rule::is_empty)
    }

    pub fn matches(&self, record: &FileRecord, scan_start: DateTime<Utc>) -> bool {
        self.match_reasons(record, scan_start).is_some()
    }

    /// Reasons from the first group that matches
    pub fn match_reasons(&self, record: &FileRecord, scan_start: DateTime<Utc>) -> Option<Vec<String>> {
        self.groups
            .iter()
            .find_map(|group| group.evaluate(record, scan_start))
    }

    /// Predefined rule sets
    pub fn template(name: &str) -> Option<RuleSet> {
        let rule = match name {
            "temp_files" => Rule {
                extensions: vec!["tmp".into(), "temp".into(), "cache".into(), "bak".into()],
                ..Default::default()
            },
            "old_downloads" => Rule {
                older_than_days: Some(90),
                ..Default::default()
            },
            "small_files" => Rule {
                size_below_bytes: Some(1024),
                ..Default::default()
            },
            "old_logs" => Rule {
                extensions: vec!["log".into(), "trace".into()],
                older_than_days: Some(30),
                ..Default::default()
            },
            _ => return None,
        };
        Some(RuleSet::from(rule))
    }

    pub fn template_names() -> &'static [&'static str] {
        &["temp_files", "old_downloads", "small_files", "old_logs"]
    }
}

impl From<Rule> for RuleSet {
    fn from(rule: Rule) -> Self {
        Self { groups: vec![rule] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification;
    use crate::features::{ExtractedFile, FeatureVector, MimeClass};
    use chrono::Duration;
    use std::path::PathBuf;

    fn record(ext: &str, size: u64, age_days: i64, scan_start: DateTime<Utc>) -> FileRecord {
        let file = ExtractedFile {
            path: PathBuf::from(format!("/data/file.{}", ext)),
            size,
            modified: scan_start - Duration::days(age_days),
            features: FeatureVector {
                size,
                extension: ext.to_string(),
                entropy: 3.5,
                mime: MimeClass::Unknown,
                age_days: age_days as f64,
                path_depth: 3,
                in_temp_folder: false,
            },
        };
        FileRecord::new(&file, Classification::heuristic(&file.features))
    }

    #[test]
    fn test_age_and_extension_group() {
        let now = Utc::now();
        let file = record("tmp", 100, 31, now);

        let thirty = RuleSet::from(Rule {
            extensions: vec![".tmp".into()],
            older_than_days: Some(30),
            ..Default::default()
        });
        assert!(thirty.matches(&file, now));

        let forty_five = RuleSet::from(Rule {
            extensions: vec![".tmp".into()],
            older_than_days: Some(45),
            ..Default::default()
        });
        assert!(!forty_five.matches(&file, now));
    }

    #[test]
    fn test_age_is_relative_to_scan_start() {
        let scan_start = Utc::now() - Duration::days(10);
        let file = record("log", 100, 25, scan_start);
        let rules = RuleSet::from(Rule {
            older_than_days: Some(30),
            ..Default::default()
        });
        // 25 days old at scan start even though wall-clock age is 35
        assert!(!rules.matches(&file, scan_start));
    }

    #[test]
    fn test_groups_are_or_combined() {
        let now = Utc::now();
        let rules = RuleSet::new(vec![
            Rule {
                extensions: vec!["bak".into()],
                ..Default::default()
            },
            Rule {
                size_below_bytes: Some(10),
                ..Default::default()
            },
        ]);
        assert!(rules.matches(&record("bak", 5000, 1, now), now));
        assert!(rules.matches(&record("txt", 5, 1, now), now));
        assert!(!rules.matches(&record("txt", 5000, 1, now), now));
    }

    #[test]
    fn test_empty_group_never_matches() {
        let now = Utc::now();
        let rules = RuleSet::from(Rule::default());
        assert!(rules.is_empty());
        assert!(!rules.matches(&record("tmp", 1, 100, now), now));
    }

    #[test]
    fn test_reasons_and_templates() {
        let now = Utc::now();
        let rules = RuleSet::template("old_logs").unwrap();
        let reasons = rules.match_reasons(&record("LOG", 10, 40, now), now).unwrap();
        assert_eq!(reasons.len(), 2);
        assert!(reasons[0].contains(".log"));
        assert!(RuleSet::template("nope").is_none());
    }

    #[test]
    fn test_deserialize_from_json() {
        let rules: RuleSet =
            serde_json::from_str(r#"{"groups":[{"extensions":[".tmp"],"older_than_days":30}]}"#)
                .unwrap();
        assert_eq!(rules.groups[0].older_than_days, Some(30));
    }
}
