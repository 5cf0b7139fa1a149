//! Error types for scoring, artifacts and the click log

use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of the scoring core
#[derive(Debug, Error)]
pub enum ScoringError {
    /// Required input fields are absent
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    /// A present field could not be interpreted
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },

    /// Preprocessor and feature vector disagree on the column set
    #[error("Schema mismatch: feature vector lacks fitted columns [{}]", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    /// No scoring artifact in any recognized format
    #[error("No fraud detection model found (searched {})", display_paths(.searched))]
    NoModelAvailable { searched: Vec<PathBuf> },

    /// Model call failed during single-event scoring
    #[error("Prediction with {model} failed: {reason}")]
    Prediction { model: String, reason: String },

    /// Required artifact does not exist
    #[error("Artifact not found at {}", .path.display())]
    ArtifactNotFound { path: PathBuf },

    /// Artifact exists but could not be loaded
    #[error("Failed to load artifact {}: {reason}", .path.display())]
    ArtifactLoad { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, ScoringError>;

/// Failure of a single model inside a batch; never aborts the batch
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelFailure {
    #[error("Model not found at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("{reason}")]
    Failed { reason: String },
}

impl ModelFailure {
    pub fn failed(reason: impl Into<String>) -> Self {
        ModelFailure::Failed {
            reason: reason.into(),
        }
    }
}

impl From<ScoringError> for ModelFailure {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::ArtifactNotFound { path } => ModelFailure::NotFound { path },
            other => ModelFailure::failed(other.to_string()),
        }
    }
}

/// Reported inline as `{"error": "..."}`
impl Serialize for ModelFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("error", &self.to_string())?;
        map.end()
    }
}

/// Malformed click-log line; skipped by readers
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Corrupt log line {line:?}: {reason}")]
pub struct LogCorruption {
    pub line: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_field() {
        let err = ScoringError::Validation {
            missing: vec!["browser".to_string(), "VPN_usage".to_string()],
        };
        assert_eq!(err.to_string(), "Missing required fields: browser, VPN_usage");
    }

    #[test]
    fn test_model_failure_serializes_as_error_object() {
        let failure = ModelFailure::NotFound {
            path: PathBuf::from("models/xgboost_model/model.json"),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            json["error"],
            "Model not found at models/xgboost_model/model.json"
        );
    }

    #[test]
    fn test_missing_artifact_maps_to_not_found() {
        let failure: ModelFailure = ScoringError::ArtifactNotFound {
            path: PathBuf::from("a.json"),
        }
        .into();
        assert!(matches!(failure, ModelFailure::NotFound { .. }));
    }
}
