//! Lazily loaded, cached model and preprocessor artifacts

use super::loader::ModelLoader;
use super::report::TrainingReport;
use super::ScoringModel;
use crate::config::{ModelEntry, ModelsConfig};
use crate::error::{Result, ScoringError};
use crate::preprocessor::Preprocessor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Resolved model ready for scoring
#[derive(Clone)]
pub struct LoadedModel {
    /// Name reported in results
    pub name: String,
    pub path: PathBuf,
    pub model: Arc<dyn ScoringModel>,
}

/// Holds every loadable artifact.
///
/// Each artifact is loaded at most once and shared read-only afterwards.
/// [`ModelRegistry::invalidate`] drops the cache so the next call picks up a
/// newly deployed artifact.
pub struct ModelRegistry {
    config: ModelsConfig,
    loader: ModelLoader,
    preprocessor: RwLock<Option<Arc<Preprocessor>>>,
    /// Keyed by path: the neural network and the best model may share a file
    models: RwLock<HashMap<PathBuf, Arc<dyn ScoringModel>>>,
}

impl ModelRegistry {
    pub fn new(config: &ModelsConfig) -> Self {
        info!(
            models_dir = %config.models_dir,
            registry = ?config.registry.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            "Model registry initialized"
        );
        Self {
            config: config.clone(),
            loader: ModelLoader::with_threads(config.onnx_threads),
            preprocessor: RwLock::new(None),
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Batch ensemble entries, in reporting order
    pub fn entries(&self) -> &[ModelEntry] {
        &self.config.registry
    }

    pub fn entry_path(&self, entry: &ModelEntry) -> PathBuf {
        self.config.resolve(&entry.path)
    }

    /// The fitted preprocessor paired with the models
    pub fn preprocessor(&self) -> Result<Arc<Preprocessor>> {
        {
            let slot = self
                .preprocessor
                .read()
                .map_err(|_| poisoned("preprocessor"))?;
            if let Some(cached) = slot.as_ref() {
                return Ok(Arc::clone(cached));
            }
        }

        let mut slot = self
            .preprocessor
            .write()
            .map_err(|_| poisoned("preprocessor"))?;
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }
        let loaded = Arc::new(Preprocessor::from_path(self.config.preprocessor_path())?);
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Load (or reuse) the artifact at `path`.
    ///
    /// A missing file is reported as `ArtifactNotFound` and not cached.
    pub fn load(&self, path: &Path) -> Result<Arc<dyn ScoringModel>> {
        {
            let models = self.models.read().map_err(|_| poisoned("models"))?;
            if let Some(model) = models.get(path) {
                debug!(path = %path.display(), "Model cache hit");
                return Ok(Arc::clone(model));
            }
        }

        let mut models = self.models.write().map_err(|_| poisoned("models"))?;
        if let Some(model) = models.get(path) {
            return Ok(Arc::clone(model));
        }
        let model = self.loader.load(path)?;
        models.insert(path.to_path_buf(), Arc::clone(&model));
        Ok(model)
    }

    /// Model registered under `name`
    pub fn model(&self, name: &str) -> Result<LoadedModel> {
        let entry = self
            .config
            .registry
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| ScoringError::ArtifactNotFound {
                path: PathBuf::from(name),
            })?;
        let path = self.entry_path(entry);
        let model = self.load(&path)?;
        Ok(LoadedModel {
            name: entry.name.clone(),
            path,
            model,
        })
    }

    /// First existing single-predict candidate, richest format first
    pub fn best_model(&self) -> Result<LoadedModel> {
        let searched: Vec<PathBuf> = self
            .config
            .best_model
            .iter()
            .map(|candidate| self.config.resolve(candidate))
            .collect();

        let path = searched
            .iter()
            .find(|p| p.exists())
            .cloned()
            .ok_or_else(|| ScoringError::NoModelAvailable {
                searched: searched.clone(),
            })?;

        let model = self.load(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(LoadedModel { name, path, model })
    }

    /// Names of registry models whose artifacts are present
    pub fn available_models(&self) -> Vec<String> {
        self.config
            .registry
            .iter()
            .filter(|e| self.entry_path(e).exists())
            .map(|e| e.name.clone())
            .collect()
    }

    /// Drop every cached artifact; the next call reloads from disk
    pub fn invalidate(&self) {
        let dropped_models = match self.models.write() {
            Ok(mut models) => {
                let n = models.len();
                models.clear();
                n
            }
            Err(poisoned) => {
                poisoned.into_inner().clear();
                0
            }
        };
        match self.preprocessor.write() {
            Ok(mut slot) => *slot = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        info!(dropped_models, "Artifact cache invalidated");
    }

    /// Training metrics recorded next to the artifacts
    pub fn training_report(&self) -> Result<TrainingReport> {
        let names: Vec<&str> = self
            .config
            .registry
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        TrainingReport::from_path(&self.config.training_report_path(), &names)
    }
}

fn poisoned(what: &str) -> ScoringError {
    ScoringError::Io(std::io::Error::other(format!("{what} cache lock poisoned")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::generic::{GenericModelArtifact, GenericModelKind};
    use crate::preprocessor::tests::artifact as preprocessor_artifact;
    use std::fs;

    pub(crate) fn write_logistic(path: &Path, n_features: usize, intercept: f64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let artifact = GenericModelArtifact {
            name: "logistic".into(),
            version: "1".into(),
            n_features,
            hard_labels: false,
            model: GenericModelKind::Logistic {
                weights: vec![0.0; n_features],
                intercept,
            },
        };
        fs::write(path, serde_json::to_vec(&artifact).unwrap()).unwrap();
    }

    pub(crate) fn models_config(dir: &Path) -> ModelsConfig {
        fs::write(
            dir.join("preprocessor.json"),
            serde_json::to_vec(&preprocessor_artifact()).unwrap(),
        )
        .unwrap();
        ModelsConfig {
            models_dir: dir.to_string_lossy().into_owned(),
            ..crate::config::AppConfig::default().models
        }
    }

    #[test]
    fn test_no_model_available() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(&models_config(dir.path()));
        match registry.best_model() {
            Err(ScoringError::NoModelAvailable { searched }) => assert_eq!(searched.len(), 2),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected no model"),
        }
    }

    #[test]
    fn test_best_model_falls_back_to_generic_format() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(&models_config(dir.path()));
        write_logistic(&dir.path().join("fraud_detection_model.json"), 5, 1.0);

        let best = registry.best_model().unwrap();
        assert_eq!(best.name, "fraud_detection_model.json");
        assert_eq!(best.model.expected_features(), Some(5));
    }

    #[test]
    fn test_artifacts_are_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(&models_config(dir.path()));
        let path = dir.path().join("xgboost_model/model.json");
        write_logistic(&path, 5, 1.0);

        let first = registry.model("xgboost").unwrap();
        // a redeploy is not visible until the cache is invalidated
        write_logistic(&path, 7, 1.0);
        let second = registry.model("xgboost").unwrap();
        assert!(Arc::ptr_eq(&first.model, &second.model));
        assert_eq!(second.model.expected_features(), Some(5));

        registry.invalidate();
        let third = registry.model("xgboost").unwrap();
        assert_eq!(third.model.expected_features(), Some(7));
    }

    #[test]
    fn test_available_models_reflect_storage() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(&models_config(dir.path()));
        assert!(registry.available_models().is_empty());

        write_logistic(&dir.path().join("random_forest_model/model.json"), 5, 0.0);
        assert_eq!(registry.available_models(), vec!["random_forest"]);
        assert!(matches!(
            registry.model("xgboost").err().unwrap(),
            ScoringError::ArtifactNotFound { .. }
        ));
    }

    #[test]
    fn test_preprocessor_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(&models_config(dir.path()));
        let a = registry.preprocessor().unwrap();
        let b = registry.preprocessor().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.width(), 5);
    }
}
