//! Generic serialized models: logistic regression and decision-tree ensembles
//! exported by the training job as JSON.

use super::{ArtifactFormat, ScoringModel};
use crate::preprocessor::EncodedBatch;
use crate::types::prediction::ModelOutput;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk form of a generic model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericModelArtifact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Encoded width the model was trained on
    pub n_features: usize,
    /// Model only exposes class labels, not probabilities
    #[serde(default)]
    pub hard_labels: bool,
    pub model: GenericModelKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenericModelKind {
    Logistic { weights: Vec<f64>, intercept: f64 },
    TreeEnsemble { trees: Vec<DecisionTree> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

/// `x[feature] <= threshold` goes left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Fraud-class probability at this leaf
        value: f64,
    },
}

impl DecisionTree {
    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("tree has no nodes");
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= n_features {
                    bail!("node {i} splits on feature {feature}, model has {n_features}");
                }
                if *left >= self.nodes.len() || *right >= self.nodes.len() {
                    bail!("node {i} points outside the tree");
                }
            }
        }
        Ok(())
    }

    fn evaluate(&self, row: &[f32]) -> Result<f64> {
        let mut index = 0;
        // a well-formed tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..self.nodes.len() {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return Ok(*value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if f64::from(row[*feature]) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
        bail!("tree contains a cycle")
    }
}

/// Loaded generic model
#[derive(Debug, Clone)]
pub struct GenericModel {
    artifact: GenericModelArtifact,
}

impl GenericModel {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model from {}", path.display()))?;
        let artifact: GenericModelArtifact =
            serde_json::from_str(&raw).context("Failed to parse model artifact")?;
        Self::from_artifact(artifact)
    }

    pub fn from_artifact(artifact: GenericModelArtifact) -> Result<Self> {
        match &artifact.model {
            GenericModelKind::Logistic { weights, .. } => {
                if weights.len() != artifact.n_features {
                    bail!(
                        "logistic model has {} weights for {} features",
                        weights.len(),
                        artifact.n_features
                    );
                }
            }
            GenericModelKind::TreeEnsemble { trees } => {
                if trees.is_empty() {
                    bail!("tree ensemble has no trees");
                }
                for tree in trees {
                    tree.validate(artifact.n_features)?;
                }
            }
        }
        Ok(Self { artifact })
    }

    pub fn artifact(&self) -> &GenericModelArtifact {
        &self.artifact
    }

    fn probability(&self, row: &[f32]) -> Result<f64> {
        match &self.artifact.model {
            GenericModelKind::Logistic { weights, intercept } => {
                let z = weights
                    .iter()
                    .zip(row)
                    .map(|(w, x)| w * f64::from(*x))
                    .sum::<f64>()
                    + intercept;
                Ok(1.0 / (1.0 + (-z).exp()))
            }
            GenericModelKind::TreeEnsemble { trees } => {
                let mut total = 0.0;
                for tree in trees {
                    total += tree.evaluate(row)?;
                }
                Ok((total / trees.len() as f64).clamp(0.0, 1.0))
            }
        }
    }
}

impl ScoringModel for GenericModel {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Json
    }

    fn expected_features(&self) -> Option<usize> {
        Some(self.artifact.n_features)
    }

    fn predict(&self, batch: &EncodedBatch) -> Result<ModelOutput> {
        if batch.width != self.artifact.n_features {
            bail!(
                "model expects {} features, encoding has {}",
                self.artifact.n_features,
                batch.width
            );
        }

        let probs = batch
            .iter_rows()
            .map(|row| self.probability(row))
            .collect::<Result<Vec<f64>>>()?;

        if self.artifact.hard_labels {
            Ok(ModelOutput::Labels(probs.iter().map(|&p| p >= 0.5).collect()))
        } else {
            Ok(ModelOutput::Probabilities(probs))
        }
    }
}
