//! Training metrics published by the training job alongside the artifacts

use crate::error::{Result, ScoringError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Metrics every model entry must carry
pub const REQUIRED_METRICS: [&str; 5] = ["accuracy", "precision", "recall", "f1", "roc_auc"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncompleteModel {
    pub model: String,
    pub missing_fields: Vec<String>,
}

/// Validated view of `training_results.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    /// Complete entries: model -> metric -> value
    pub models: BTreeMap<String, BTreeMap<String, f64>>,
    /// Expected models with no entry at all
    pub missing_models: Vec<String>,
    pub incomplete: Vec<IncompleteModel>,
}

impl TrainingReport {
    pub fn from_path(path: &Path, expected: &[&str]) -> Result<Self> {
        if !path.exists() {
            return Err(ScoringError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        let object = value.as_object().ok_or_else(|| ScoringError::ArtifactLoad {
            path: path.to_path_buf(),
            reason: "training results must be a JSON object".to_string(),
        })?;
        Ok(Self::from_results(object, expected))
    }

    pub fn from_results(results: &Map<String, Value>, expected: &[&str]) -> Self {
        let mut report = TrainingReport {
            models: BTreeMap::new(),
            missing_models: Vec::new(),
            incomplete: Vec::new(),
        };

        for &name in expected {
            let Some(entry) = results.get(name).and_then(Value::as_object) else {
                report.missing_models.push(name.to_string());
                continue;
            };

            let metrics: BTreeMap<String, f64> = REQUIRED_METRICS
                .iter()
                .filter_map(|&field| entry.get(field).and_then(Value::as_f64).map(|v| (field.to_string(), v)))
                .collect();

            if metrics.len() == REQUIRED_METRICS.len() {
                report.models.insert(name.to_string(), metrics);
            } else {
                report.incomplete.push(IncompleteModel {
                    model: name.to_string(),
                    missing_fields: REQUIRED_METRICS
                        .iter()
                        .filter(|field| !metrics.contains_key(**field))
                        .map(|field| field.to_string())
                        .collect(),
                });
            }
        }
        report
    }

    pub fn is_complete(&self) -> bool {
        self.missing_models.is_empty() && self.incomplete.is_empty()
    }
}
