//! Frozen preprocessing transform: feature vector to model-ready encoding.
//!
//! The parameters (column order, vocabularies, standardization statistics) are
//! fitted by the training job and shipped as a JSON artifact. Nothing here
//! refits them; a loaded [`Preprocessor`] is immutable and safe to share.

use crate::error::{Result, ScoringError};
use crate::feature_extractor::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Standardization statistics of one numeric column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumn {
    pub name: String,
    pub mean: f64,
    /// Standard deviation; 0 means the column was constant in training
    pub scale: f64,
}

/// Fitted vocabulary of one categorical column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub name: String,
    pub categories: Vec<String>,
}

/// On-disk form of a fitted preprocessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorArtifact {
    #[serde(default)]
    pub version: String,
    pub numeric: Vec<NumericColumn>,
    pub categorical: Vec<CategoricalColumn>,
}

/// One encoded row
pub type EncodedVector = Vec<f32>;

/// Row-major block of encoded rows, shaped `[rows, width]`
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub rows: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl EncodedBatch {
    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.width..(index + 1) * self.width]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on 0
        self.data.chunks_exact(self.width.max(1)).take(self.rows)
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Loaded, validated preprocessor
#[derive(Debug, Clone)]
pub struct Preprocessor {
    artifact: PreprocessorArtifact,
    /// category -> slot, per categorical column
    vocabularies: Vec<HashMap<String, usize>>,
    width: usize,
}

impl Preprocessor {
    /// Load and validate a preprocessor artifact
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScoringError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let artifact: PreprocessorArtifact =
            serde_json::from_str(&raw).map_err(|e| ScoringError::ArtifactLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let preprocessor = Self::from_artifact(artifact)?;

        info!(
            path = %path.display(),
            version = %preprocessor.artifact.version,
            width = preprocessor.width,
            "Preprocessor loaded"
        );
        Ok(preprocessor)
    }

    /// Validate the fitted column set against what feature vectors expose
    pub fn from_artifact(artifact: PreprocessorArtifact) -> Result<Self> {
        let numeric_known: Vec<&str> = FeatureVector::numeric_columns().collect();
        let categorical_known: Vec<&str> = FeatureVector::categorical_columns().collect();

        let mut missing: Vec<String> = artifact
            .numeric
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !numeric_known.contains(name))
            .map(str::to_string)
            .collect();
        missing.extend(
            artifact
                .categorical
                .iter()
                .map(|c| c.name.as_str())
                .filter(|name| !categorical_known.contains(name))
                .map(str::to_string),
        );
        if !missing.is_empty() {
            return Err(ScoringError::SchemaMismatch { missing });
        }

        let vocabularies: Vec<HashMap<String, usize>> = artifact
            .categorical
            .iter()
            .map(|column| {
                column
                    .categories
                    .iter()
                    .enumerate()
                    .map(|(slot, category)| (category.clone(), slot))
                    .collect()
            })
            .collect();

        // one trailing "unknown" slot per categorical column
        let width = artifact.numeric.len()
            + artifact
                .categorical
                .iter()
                .map(|c| c.categories.len() + 1)
                .sum::<usize>();

        Ok(Self {
            artifact,
            vocabularies,
            width,
        })
    }

    /// Length of every encoded vector
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn artifact(&self) -> &PreprocessorArtifact {
        &self.artifact
    }

    /// Encode one feature vector
    pub fn transform(&self, features: &FeatureVector) -> Result<EncodedVector> {
        let mut encoded = Vec::with_capacity(self.width);
        self.encode_into(features, &mut encoded)?;
        Ok(encoded)
    }

    /// Encode many feature vectors into one row-major block
    pub fn transform_batch(&self, features: &[FeatureVector]) -> Result<EncodedBatch> {
        let mut data = Vec::with_capacity(self.width * features.len());
        for fv in features {
            self.encode_into(fv, &mut data)?;
        }
        Ok(EncodedBatch {
            rows: features.len(),
            width: self.width,
            data,
        })
    }

    fn encode_into(&self, features: &FeatureVector, out: &mut Vec<f32>) -> Result<()> {
        for column in &self.artifact.numeric {
            let value = features
                .numeric(&column.name)
                .ok_or_else(|| schema_mismatch(&column.name))?;
            let scale = if column.scale == 0.0 || !column.scale.is_finite() {
                1.0
            } else {
                column.scale
            };
            out.push(((value - column.mean) / scale) as f32);
        }

        for (column, vocabulary) in self.artifact.categorical.iter().zip(&self.vocabularies) {
            let value = features
                .categorical(&column.name)
                .ok_or_else(|| schema_mismatch(&column.name))?;
            let unknown_slot = column.categories.len();
            let hot = vocabulary.get(value).copied().unwrap_or(unknown_slot);
            out.extend((0..=unknown_slot).map(|slot| if slot == hot { 1.0 } else { 0.0 }));
        }
        Ok(())
    }
}

fn schema_mismatch(name: &str) -> ScoringError {
    ScoringError::SchemaMismatch {
        missing: vec![name.to_string()],
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feature_extractor::tests::event_at;
    use crate::feature_extractor::FeatureExtractor;

    pub(crate) fn artifact() -> PreprocessorArtifact {
        PreprocessorArtifact {
            version: "test".to_string(),
            numeric: vec![
                NumericColumn {
                    name: "hour".to_string(),
                    mean: 12.0,
                    scale: 6.0,
                },
                NumericColumn {
                    name: "fraud_risk_score".to_string(),
                    mean: 0.3,
                    scale: 0.0,
                },
            ],
            categorical: vec![CategoricalColumn {
                name: "device_type".to_string(),
                categories: vec!["Desktop".to_string(), "Mobile".to_string()],
            }],
        }
    }

    #[test]
    fn test_width_includes_unknown_bucket() {
        let pre = Preprocessor::from_artifact(artifact()).unwrap();
        assert_eq!(pre.width(), 2 + 3);
    }

    #[test]
    fn test_transform() {
        let pre = Preprocessor::from_artifact(artifact()).unwrap();
        let fv = FeatureExtractor::new().extract(&event_at("2024-03-09 18:00:00"));
        let encoded = pre.transform(&fv).unwrap();

        assert_eq!(encoded.len(), pre.width());
        assert_eq!(encoded[0], 1.0); // (18 - 12) / 6
        assert!((encoded[1] - 0.49).abs() < 1e-6); // zero scale treated as 1
        assert_eq!(&encoded[2..], &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_unseen_category_uses_shared_bucket() {
        let pre = Preprocessor::from_artifact(artifact()).unwrap();
        let mut event = event_at("2024-03-09 18:00:00");
        event.device_type = "SmartTV".to_string();
        let encoded = pre.transform(&FeatureExtractor::new().extract(&event)).unwrap();
        assert_eq!(&encoded[2..], &[0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unfitted_columns_are_rejected() {
        let mut bad = artifact();
        bad.numeric.push(NumericColumn {
            name: "click_frequency".to_string(),
            mean: 0.0,
            scale: 1.0,
        });
        bad.categorical.push(CategoricalColumn {
            name: "hour".to_string(),
            categories: vec![],
        });

        match Preprocessor::from_artifact(bad) {
            Err(ScoringError::SchemaMismatch { missing }) => {
                assert_eq!(missing, vec!["click_frequency", "hour"]);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_batch_layout() {
        let pre = Preprocessor::from_artifact(artifact()).unwrap();
        let extractor = FeatureExtractor::new();
        let features = vec![
            extractor.extract(&event_at("2024-03-09 12:00:00")),
            extractor.extract(&event_at("2024-03-09 06:00:00")),
        ];
        let batch = pre.transform_batch(&features).unwrap();
        assert_eq!(batch.rows, 2);
        assert_eq!(batch.data.len(), 2 * pre.width());
        assert_eq!(batch.row(1)[0], -1.0);
        assert_eq!(batch.iter_rows().count(), 2);
    }

    #[test]
    fn test_missing_artifact() {
        let err = Preprocessor::from_path("/nonexistent/preprocessor.json").unwrap_err();
        assert!(matches!(err, ScoringError::ArtifactNotFound { .. }));
    }
}
