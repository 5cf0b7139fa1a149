//! ML model inference components

pub mod aggregator;
pub mod generic;
pub mod inference;
pub mod loader;
pub mod onnx;
pub mod registry;
pub mod report;

use crate::preprocessor::EncodedBatch;
use crate::types::prediction::ModelOutput;
use std::path::Path;

pub use aggregator::{BatchReport, ChunkScores};
pub use inference::ScoringEngine;
pub use loader::ModelLoader;
pub use registry::ModelRegistry;

/// Serialized artifact formats, richest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// ONNX graph run by ONNX Runtime
    Onnx,
    /// Generic serialized model (logistic or tree ensemble)
    Json,
}

impl ArtifactFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "onnx" => Some(ArtifactFormat::Onnx),
            "json" => Some(ArtifactFormat::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactFormat::Onnx => "onnx",
            ArtifactFormat::Json => "json",
        }
    }
}

/// A pre-trained scoring function. Loaded once, never mutated while serving.
pub trait ScoringModel: Send + Sync {
    fn format(&self) -> ArtifactFormat;

    /// Encoded width the model was trained on, when the artifact declares it
    fn expected_features(&self) -> Option<usize>;

    /// Score every row of the batch; output length equals `batch.rows`
    fn predict(&self, batch: &EncodedBatch) -> anyhow::Result<ModelOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ArtifactFormat::from_path(Path::new("models/fraud_detection_model.onnx")),
            Some(ArtifactFormat::Onnx)
        );
        assert_eq!(
            ArtifactFormat::from_path(Path::new("xgboost_model/model.json")),
            Some(ArtifactFormat::Json)
        );
        assert_eq!(ArtifactFormat::from_path(Path::new("model.pkl")), None);
        assert_eq!(ArtifactFormat::from_path(Path::new("model")), None);
    }
}
