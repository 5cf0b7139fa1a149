//! ONNX Runtime models (the neural network and any exported classifier)

use super::{ArtifactFormat, ScoringModel};
use crate::preprocessor::EncodedBatch;
use crate::types::prediction::ModelOutput;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info, warn};

static RUNTIME_READY: OnceLock<bool> = OnceLock::new();

/// Initialize ONNX Runtime once per process
fn init_runtime() -> Result<()> {
    let ready = RUNTIME_READY.get_or_init(|| match ort::init().commit() {
        Ok(_) => {
            info!("ONNX Runtime initialized");
            true
        }
        Err(e) => {
            warn!(error = %e, "ONNX Runtime failed to initialize");
            false
        }
    });
    if *ready {
        Ok(())
    } else {
        anyhow::bail!("ONNX Runtime is not available")
    }
}

/// Loaded ONNX session with its I/O names
pub struct OnnxModel {
    /// Running a session needs exclusive access
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    label_name: Option<String>,
}

impl OnnxModel {
    /// Load an ONNX model from file
    pub fn load(path: &Path, onnx_threads: usize) -> Result<Self> {
        init_runtime()?;

        info!(path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob") || o.name.contains("output"))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| {
                session
                    .outputs
                    .last()
                    .map(|o| o.name.clone())
                    .unwrap_or_else(|| "probabilities".to_string())
            });

        let label_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        info!(
            input = %input_name,
            output = %output_name,
            "ONNX model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            label_name,
        })
    }

    /// Pull per-row fraud probabilities out of the session outputs.
    ///
    /// Handles `[N, 2]`, `[N, 1]` and `[N]` tensors, `seq(map(int64, float))`
    /// (zipmap classifiers), and falls back to an int64 label output.
    fn extract(&self, outputs: &SessionOutputs, rows: usize) -> Result<ModelOutput> {
        if let Some(output) = outputs.get(self.output_name.as_str()) {
            if let Some(probs) = probabilities_from_value(output, rows)? {
                return Ok(ModelOutput::Probabilities(probs));
            }
        }

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }
            if let Some(probs) = probabilities_from_value(&output, rows)? {
                debug!(output = %name, "Extracted probabilities (fallback output)");
                return Ok(ModelOutput::Probabilities(probs));
            }
        }

        if let Some(label_name) = &self.label_name {
            if let Some(output) = outputs.get(label_name.as_str()) {
                if let Ok((_, labels)) = output.try_extract_tensor::<i64>() {
                    if labels.len() == rows {
                        return Ok(ModelOutput::Labels(labels.iter().map(|&l| l == 1).collect()));
                    }
                }
            }
        }

        anyhow::bail!("model produced no usable probability or label output")
    }
}

fn probabilities_from_value(output: &DynValue, rows: usize) -> Result<Option<Vec<f64>>> {
    let dtype = output.dtype();

    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let dims: Vec<i64> = shape.iter().copied().collect();
        return probabilities_from_tensor(&dims, data, rows).map(Some);
    }

    if DynSequenceValueType::can_downcast(&dtype) {
        return probabilities_from_sequence_map(output, rows).map(Some);
    }

    Ok(None)
}

/// Fraud-class column of a classifier tensor
fn probabilities_from_tensor(dims: &[i64], data: &[f32], rows: usize) -> Result<Vec<f64>> {
    match dims {
        [n, classes] if *n as usize == rows && *classes >= 2 => {
            let classes = *classes as usize;
            Ok((0..rows).map(|r| f64::from(data[r * classes + 1])).collect())
        }
        [n, 1] if *n as usize == rows => Ok(data.iter().map(|&v| f64::from(v)).collect()),
        [n] if *n as usize == rows => Ok(data.iter().map(|&v| f64::from(v)).collect()),
        _ => anyhow::bail!("unexpected output shape {dims:?} for {rows} rows"),
    }
}

/// Class-1 probability from each `map(int64, float)` of a sequence
fn probabilities_from_sequence_map(output: &DynValue, rows: usize) -> Result<Vec<f64>> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;
    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;

    if maps.len() != rows {
        anyhow::bail!("sequence output has {} entries for {} rows", maps.len(), rows);
    }

    let mut probs = Vec::with_capacity(rows);
    for map_value in &maps {
        let kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
        let fraud = kv_pairs
            .iter()
            .find(|(class_id, _)| *class_id == 1)
            .map(|(_, p)| f64::from(*p))
            .or_else(|| {
                kv_pairs
                    .iter()
                    .find(|(class_id, _)| *class_id == 0)
                    .map(|(_, p)| 1.0 - f64::from(*p))
            })
            .ok_or_else(|| anyhow::anyhow!("No probability found in map"))?;
        probs.push(fraud);
    }
    Ok(probs)
}

impl ScoringModel for OnnxModel {
    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Onnx
    }

    fn expected_features(&self) -> Option<usize> {
        None
    }

    fn predict(&self, batch: &EncodedBatch) -> Result<ModelOutput> {
        let shape = vec![batch.rows as i64, batch.width as i64];
        let input_tensor = Tensor::from_array((shape, batch.data.clone()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![self.input_name.as_str() => input_tensor])?;

        self.extract(&outputs, batch.rows)
    }
}
