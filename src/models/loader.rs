//! Model artifact loader

use super::generic::GenericModel;
use super::onnx::OnnxModel;
use super::{ArtifactFormat, ScoringModel};
use crate::error::{Result, ScoringError};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Loads model artifacts by file format
#[derive(Debug, Clone)]
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        Self {
            onnx_threads: onnx_threads.max(1),
        }
    }

    /// Load a single model artifact; the format follows the file extension
    pub fn load(&self, path: &Path) -> Result<Arc<dyn ScoringModel>> {
        if !path.exists() {
            return Err(ScoringError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }

        let load_error = |e: anyhow::Error| ScoringError::ArtifactLoad {
            path: path.to_path_buf(),
            reason: format!("{e:#}"),
        };

        let model: Arc<dyn ScoringModel> = match ArtifactFormat::from_path(path) {
            Some(ArtifactFormat::Onnx) => {
                Arc::new(OnnxModel::load(path, self.onnx_threads).map_err(load_error)?)
            }
            Some(ArtifactFormat::Json) => {
                Arc::new(GenericModel::from_path(path).map_err(load_error)?)
            }
            None => {
                return Err(ScoringError::ArtifactLoad {
                    path: path.to_path_buf(),
                    reason: "unsupported model format".to_string(),
                })
            }
        };

        info!(
            path = %path.display(),
            format = model.format().as_str(),
            "Model loaded successfully"
        );
        Ok(model)
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_found() {
        let err = ModelLoader::new()
            .load(Path::new("/nonexistent/model.json"))
            .err()
            .unwrap();
        assert!(matches!(err, ScoringError::ArtifactNotFound { .. }));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pkl");
        std::fs::write(&path, b"pickle").unwrap();
        let err = ModelLoader::new().load(&path).err().unwrap();
        assert!(matches!(err, ScoringError::ArtifactLoad { .. }));
    }

    #[test]
    fn test_corrupt_json_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"{\"n_features\": 3").unwrap();
        let err = ModelLoader::new().load(&path).err().unwrap();
        assert!(err.to_string().contains("Failed to parse model artifact"));
    }
}
