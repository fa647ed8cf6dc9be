// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Trainable category model and its on-disk form
//!
//! The model is a standardised nearest-centroid classifier over the numeric
//! features, combined with a Laplace-smoothed extension likelihood per class.
//! Scores are turned into a probability with a softmax, so the reported
//! confidence is always within [0, 1].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Category, CategoryModel, Prediction};
use crate::features::{FeatureVector, NUMERIC_FEATURES};
use crate::{Result, WardenError};

/// Minimum number of samples accepted by [`CentroidModel::fit`]
pub const MIN_TRAINING_SAMPLES: usize = 5;

/// One training example
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledSample {
    pub features: FeatureVector,
    pub label: Category,
}

impl LabeledSample {
    /// Label a sample from the extension table
    pub fn self_labeled(features: FeatureVector) -> Self {
        let label = Category::for_extension(&features.extension);
        Self { features, label }
    }
}

/// Summary of a trained model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub kind: String,
    pub classes: Vec<Category>,
    pub samples: usize,
    pub trained_at: Option<DateTime<Utc>>,
    /// Accuracy on the training set itself
    pub training_accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassStats {
    centroid: Vec<f64>,
    count: usize,
    extensions: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidModel {
    means: Vec<f64>,
    scales: Vec<f64>,
    classes: BTreeMap<Category, ClassStats>,
    vocabulary: usize,
    info: ModelInfo,
}

impl CentroidModel {
    /// Fit a model to labelled samples
    pub fn fit(samples: &[LabeledSample]) -> Result<Self> {
        if samples.len() < MIN_TRAINING_SAMPLES {
            return Err(WardenError::InvalidState(format!(
                "Insufficient training data: need at least {} samples, got {}",
                MIN_TRAINING_SAMPLES,
                samples.len()
            )));
        }

        let rows: Vec<[f64; NUMERIC_FEATURES]> =
            samples.iter().map(|s| s.features.numeric()).collect();
        let n = rows.len() as f64;

        let mut means = vec![0.0; NUMERIC_FEATURES];
        for row in &rows {
            for (m, v) in means.iter_mut().zip(row.iter()) {
                *m += v / n;
            }
        }

        let mut scales = vec![0.0; NUMERIC_FEATURES];
        for row in &rows {
            for ((s, v), m) in scales.iter_mut().zip(row.iter()).zip(means.iter()) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = s.sqrt();
            if *s < 1e-9 {
                *s = 1.0;
            }
        }

        let mut classes: BTreeMap<Category, ClassStats> = BTreeMap::new();
        let mut vocabulary: HashSet<&str> = HashSet::new();
        for (sample, row) in samples.iter().zip(rows.iter()) {
            let z = standardize(row, &means, &scales);
            let stats = classes.entry(sample.label).or_insert_with(|| ClassStats {
                centroid: vec![0.0; NUMERIC_FEATURES],
                count: 0,
                extensions: HashMap::new(),
            });
            for (c, v) in stats.centroid.iter_mut().zip(z.iter()) {
                *c += v;
            }
            stats.count += 1;
            *stats
                .extensions
                .entry(sample.features.extension.clone())
                .or_insert(0) += 1;
            vocabulary.insert(sample.features.extension.as_str());
        }

        if classes.len() < 2 {
            return Err(WardenError::InvalidState(
                "Training data must contain at least two categories".to_string(),
            ));
        }

        for stats in classes.values_mut() {
            let count = stats.count as f64;
            for c in stats.centroid.iter_mut() {
                *c /= count;
            }
        }

        let mut model = Self {
            means,
            scales,
            classes,
            vocabulary: vocabulary.len(),
            info: ModelInfo {
                kind: "centroid".to_string(),
                classes: Vec::new(),
                samples: samples.len(),
                trained_at: Some(Utc::now()),
                training_accuracy: 0.0,
            },
        };
        model.info.classes = model.classes.keys().copied().collect();

        let correct = samples
            .iter()
            .filter(|s| model.score(&s.features).0 == s.label)
            .count();
        model.info.training_accuracy = correct as f64 / samples.len() as f64;

        info!(
            "Trained model on {} samples, {} classes, training accuracy {:.1}%",
            samples.len(),
            model.classes.len(),
            model.info.training_accuracy * 100.0
        );
        Ok(model)
    }

    /// Fit using extension-table labels, for unlabelled scan data
    pub fn fit_self_labeled(features: Vec<FeatureVector>) -> Result<Self> {
        let samples: Vec<LabeledSample> =
            features.into_iter().map(LabeledSample::self_labeled).collect();
        Self::fit(&samples)
    }

    fn score(&self, features: &FeatureVector) -> (Category, f64) {
        let z = standardize(&features.numeric(), &self.means, &self.scales);
        let total: usize = self.classes.values().map(|c| c.count).sum();

        let scores: Vec<(Category, f64)> = self
            .classes
            .iter()
            .map(|(category, stats)| {
                let distance: f64 = z
                    .iter()
                    .zip(stats.centroid.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    / NUMERIC_FEATURES as f64;
                let ext_count = stats.extensions.get(&features.extension).copied().unwrap_or(0);
                let ext_likelihood = (ext_count as f64 + 1.0)
                    / (stats.count as f64 + self.vocabulary as f64 + 1.0);
                let prior = stats.count as f64 / total as f64;
                (*category, -0.5 * distance + ext_likelihood.ln() + prior.ln())
            })
            .collect();

        let max = scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let denom: f64 = scores.iter().map(|(_, s)| (s - max).exp()).sum();

        scores
            .iter()
            .map(|(c, s)| (*c, (s - max).exp() / denom))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((Category::Others, 0.0))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&content)?;
        if model.means.len() != NUMERIC_FEATURES || model.scales.len() != NUMERIC_FEATURES {
            return Err(WardenError::ClassificationUnavailable(format!(
                "model at {:?} was trained with a different feature layout",
                path
            )));
        }
        Ok(model)
    }
}

fn standardize(row: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means.iter())
        .zip(scales.iter())
        .map(|((v, m), s)| (v - m) / s)
        .collect()
}

impl CategoryModel for CentroidModel {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction> {
        let (category, confidence) = self.score(features);
        Ok(Prediction {
            category,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    fn info(&self) -> ModelInfo {
        self.info.clone()
    }
}

/// Capability that produces the model a session should use
pub trait ModelSource: Send + Sync {
    /// `Ok(None)` means "no model available"; callers fall back to heuristics.
    fn load_model(&self) -> Result<Option<Arc<dyn CategoryModel>>>;
}

/// Loads a [`CentroidModel`] from a JSON file
#[derive(Debug, Clone)]
pub struct FileModelSource {
    path: PathBuf,
}

impl FileModelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelSource for FileModelSource {
    fn load_model(&self) -> Result<Option<Arc<dyn CategoryModel>>> {
        if !self.path.exists() {
            warn!("Model file not found: {:?}", self.path);
            return Ok(None);
        }
        let model = CentroidModel::load(&self.path)?;
        info!("Loaded model from {:?} ({} classes)", self.path, model.classes.len());
        Ok(Some(Arc::new(model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MimeClass;

    fn sample(ext: &str, size: u64, entropy: f64, mime: MimeClass) -> FeatureVector {
        FeatureVector {
            size,
            extension: ext.to_string(),
            entropy,
            mime,
            age_days: 10.0,
            path_depth: 4,
            in_temp_folder: false,
        }
    }

    fn training_set() -> Vec<FeatureVector> {
        let mut out = Vec::new();
        for i in 0..6 {
            out.push(sample("jpg", 2_000_000 + i * 1000, 7.8, MimeClass::Image));
            out.push(sample("txt", 2_000 + i * 10, 4.2, MimeClass::Text));
            out.push(sample("zip", 50_000_000 + i, 7.99, MimeClass::Application));
        }
        out
    }

    #[test]
    fn test_fit_requires_enough_samples() {
        let few: Vec<FeatureVector> = training_set().into_iter().take(3).collect();
        assert!(CentroidModel::fit_self_labeled(few).is_err());
    }

    #[test]
    fn test_fit_requires_two_classes() {
        let one_class: Vec<FeatureVector> = (0..6)
            .map(|i| sample("txt", 100 + i, 4.0, MimeClass::Text))
            .collect();
        assert!(CentroidModel::fit_self_labeled(one_class).is_err());
    }

    #[test]
    fn test_predicts_training_categories() {
        let model = CentroidModel::fit_self_labeled(training_set()).unwrap();
        let p = model
            .predict(&sample("jpg", 2_500_000, 7.7, MimeClass::Image))
            .unwrap();
        assert_eq!(p.category, Category::Images);
        assert!((0.0..=1.0).contains(&p.confidence));
        assert!(model.info().training_accuracy > 0.9);
    }

    #[test]
    fn test_save_load_round_trip_predicts_same() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let model = CentroidModel::fit_self_labeled(training_set()).unwrap();
        model.save(&path).unwrap();

        let source = FileModelSource::new(&path);
        let loaded = source.load_model().unwrap().expect("model present");
        let query = sample("txt", 2_100, 4.1, MimeClass::Text);
        let before = model.predict(&query).unwrap();
        let after = loaded.predict(&query).unwrap();
        assert_eq!(before.category, after.category);
        assert!((before.confidence - after.confidence).abs() < 1e-6);
    }

    #[test]
    fn test_missing_model_file_is_none() {
        let source = FileModelSource::new("/nonexistent/model.json");
        assert!(source.load_model().unwrap().is_none());
    }
}
