// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category classification with a deterministic extension fallback

pub mod model;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::features::FeatureVector;
use crate::{Result, WardenError};

pub use model::{CentroidModel, FileModelSource, LabeledSample, ModelInfo, ModelSource};

/// Predicted file-type bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Documents,
    Images,
    Videos,
    Audio,
    Archives,
    Code,
    Spreadsheets,
    Presentations,
    Executables,
    Others,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Documents,
        Category::Images,
        Category::Videos,
        Category::Audio,
        Category::Archives,
        Category::Code,
        Category::Spreadsheets,
        Category::Presentations,
        Category::Executables,
        Category::Others,
    ];

    /// Folder name used when organizing
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Documents => "Documents",
            Category::Images => "Images",
            Category::Videos => "Videos",
            Category::Audio => "Audio",
            Category::Archives => "Archives",
            Category::Code => "Code",
            Category::Spreadsheets => "Spreadsheets",
            Category::Presentations => "Presentations",
            Category::Executables => "Executables",
            Category::Others => "Others",
        }
    }

    /// Extension lookup table. `ext` is lowercase without a dot.
    pub fn for_extension(ext: &str) -> Category {
        match ext {
            "pdf" | "doc" | "docx" | "txt" | "rtf" | "odt" | "pages" | "md" => Category::Documents,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "tiff" | "tif" | "svg" | "webp" | "heic" => {
                Category::Images
            }
            "mp4" | "avi" | "mkv" | "mov" | "wmv" | "flv" | "webm" | "m4v" => Category::Videos,
            "mp3" | "wav" | "flac" | "aac" | "ogg" | "wma" | "m4a" => Category::Audio,
            "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" | "tgz" => Category::Archives,
            "py" | "js" | "ts" | "html" | "css" | "cpp" | "c" | "h" | "java" | "php" | "rb"
            | "rs" | "go" => Category::Code,
            "xlsx" | "xls" | "csv" | "ods" => Category::Spreadsheets,
            "pptx" | "ppt" | "odp" => Category::Presentations,
            "exe" | "msi" | "dmg" | "deb" | "rpm" | "app" | "apk" => Category::Executables,
            _ => Category::Others,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = WardenError;

    /// Case-insensitive category name
    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.dir_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WardenError::Config(format!("Unknown category '{}'", s)))
    }
}

/// How a category was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationMethod {
    Model,
    Heuristic,
}

impl fmt::Display for ClassificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationMethod::Model => f.write_str("model"),
            ClassificationMethod::Heuristic => f.write_str("heuristic"),
        }
    }
}

/// Tagged classification result
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    /// Always within [0, 1]; exactly 1.0 for heuristic results
    pub confidence: f64,
    pub method: ClassificationMethod,
}

impl Classification {
    pub fn heuristic(features: &FeatureVector) -> Self {
        Self {
            category: Category::for_extension(&features.extension),
            confidence: 1.0,
            method: ClassificationMethod::Heuristic,
        }
    }
}

/// Raw output of a trained model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub category: Category,
    pub confidence: f64,
}

/// A trained category model
pub trait CategoryModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<Prediction>;

    fn info(&self) -> ModelInfo;
}

/// Classifier bound to one model snapshot.
///
/// A scan session clones the engine's current snapshot when it starts, so
/// reloading a model never changes classifications inside a running scan.
#[derive(Clone)]
pub struct Classifier {
    model: Option<Arc<dyn CategoryModel>>,
    threshold: f64,
}

impl Classifier {
    pub fn new(model: Option<Arc<dyn CategoryModel>>, threshold: f64) -> Self {
        Self {
            model,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Classify one feature vector, falling back to the extension table when
    /// no model is loaded or the model is not confident enough.
    pub fn predict(&self, features: &FeatureVector) -> Classification {
        match self.model_prediction(features) {
            Ok(prediction) if prediction.confidence >= self.threshold => Classification {
                category: prediction.category,
                confidence: prediction.confidence.clamp(0.0, 1.0),
                method: ClassificationMethod::Model,
            },
            Ok(prediction) => {
                debug!(
                    "Model confidence {:.2} below {:.2} for .{} file, using extension table",
                    prediction.confidence, self.threshold, features.extension
                );
                Classification::heuristic(features)
            }
            Err(WardenError::ClassificationUnavailable(_)) => Classification::heuristic(features),
            Err(e) => {
                debug!("Model prediction failed: {}, using extension table", e);
                Classification::heuristic(features)
            }
        }
    }

    fn model_prediction(&self, features: &FeatureVector) -> Result<Prediction> {
        let model = self.model.as_ref().ok_or_else(|| {
            WardenError::ClassificationUnavailable("no model loaded".to_string())
        })?;
        model.predict(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MimeClass;

    struct FixedModel(Prediction);

    impl CategoryModel for FixedModel {
        fn predict(&self, _features: &FeatureVector) -> Result<Prediction> {
            Ok(self.0)
        }

        fn info(&self) -> ModelInfo {
            ModelInfo::default()
        }
    }

    fn features(ext: &str) -> FeatureVector {
        FeatureVector {
            size: 2048,
            extension: ext.to_string(),
            entropy: 4.0,
            mime: MimeClass::Unknown,
            age_days: 3.0,
            path_depth: 3,
            in_temp_folder: false,
        }
    }

    #[test]
    fn test_no_model_falls_back_to_heuristic() {
        let result = Classifier::new(None, 0.7).predict(&features("png"));
        assert_eq!(result.category, Category::Images);
        assert_eq!(result.method, ClassificationMethod::Heuristic);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_confident_model_wins() {
        let model = Arc::new(FixedModel(Prediction {
            category: Category::Code,
            confidence: 0.92,
        }));
        let result = Classifier::new(Some(model), 0.7).predict(&features("txt"));
        assert_eq!(result.category, Category::Code);
        assert_eq!(result.method, ClassificationMethod::Model);
        assert!((result.confidence - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn test_low_confidence_uses_heuristic() {
        let model = Arc::new(FixedModel(Prediction {
            category: Category::Code,
            confidence: 0.4,
        }));
        let result = Classifier::new(Some(model), 0.7).predict(&features("txt"));
        assert_eq!(result.category, Category::Documents);
        assert_eq!(result.method, ClassificationMethod::Heuristic);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_extension_table() {
        assert_eq!(Category::for_extension("docx"), Category::Documents);
        assert_eq!(Category::for_extension("exe"), Category::Executables);
        assert_eq!(Category::for_extension("weird"), Category::Others);
        assert_eq!(Category::Spreadsheets.to_string(), "Spreadsheets");
    }
}
