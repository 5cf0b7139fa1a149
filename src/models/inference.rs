//! Scoring engine: feature extraction, preprocessing and model execution

use super::aggregator::{BatchReport, ChunkScores, ModelOutcome};
use super::registry::ModelRegistry;
use crate::batch::EventChunk;
use crate::config::ScoringConfig;
use crate::error::{ModelFailure, Result, ScoringError};
use crate::feature_extractor::FeatureExtractor;
use crate::metrics::PipelineMetrics;
use crate::prediction_log::PredictionLog;
use crate::preprocessor::EncodedBatch;
use crate::types::event::RawEvent;
use crate::types::prediction::{ModelPredictions, Prediction, Verdict};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Turns raw events into fraud verdicts.
///
/// Single-event scoring uses the best available artifact only; batch scoring
/// runs every registry model and isolates their failures from one another.
pub struct ScoringEngine {
    registry: Arc<ModelRegistry>,
    extractor: FeatureExtractor,
    threshold: f64,
    metrics: Arc<PipelineMetrics>,
    prediction_log: Option<PredictionLog>,
}

impl ScoringEngine {
    pub fn new(registry: Arc<ModelRegistry>, scoring: &ScoringConfig, metrics: Arc<PipelineMetrics>) -> Self {
        info!(threshold = scoring.threshold, "Scoring engine initialized");
        Self {
            registry,
            extractor: FeatureExtractor::new(),
            threshold: scoring.threshold,
            metrics,
            prediction_log: None,
        }
    }

    /// Audit every single prediction to `log`
    pub fn with_prediction_log(mut self, log: PredictionLog) -> Self {
        self.prediction_log = Some(log);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Names reported by batch scoring, in registry order
    pub fn model_names(&self) -> Vec<String> {
        self.registry.entries().iter().map(|e| e.name.clone()).collect()
    }

    /// Score one event with the best available model
    pub fn predict(&self, event: &RawEvent) -> Result<Verdict> {
        let start = Instant::now();
        // an artifact that exists but cannot be loaded is a failed model call
        let best = self.registry.best_model().map_err(|e| match e {
            ScoringError::ArtifactLoad { path, reason } => ScoringError::Prediction {
                model: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                reason,
            },
            other => other,
        })?;
        let preprocessor = self.registry.preprocessor()?;

        let features = self.extractor.extract(event);
        let encoded = preprocessor.transform_batch(std::slice::from_ref(&features))?;

        let prediction_error = |reason: String| ScoringError::Prediction {
            model: best.name.clone(),
            reason,
        };

        let model_start = Instant::now();
        let output = best
            .model
            .predict(&encoded)
            .map_err(|e| prediction_error(format!("{e:#}")))?;
        self.metrics.record_model_time(&best.name, model_start.elapsed());

        let (probs, flags) = output.into_columns(self.threshold);
        let (Some(&fraud_probability), Some(&is_fraud)) = (probs.first(), flags.first()) else {
            return Err(prediction_error("model returned no rows".to_string()));
        };
        let prediction = Prediction {
            is_fraud,
            fraud_probability,
            threshold: self.threshold,
        };

        debug!(
            model = %best.name,
            fraud_probability,
            is_fraud,
            risk = features.fraud_risk_score,
            "Single prediction complete"
        );
        self.metrics
            .record_prediction(start.elapsed(), fraud_probability, is_fraud);

        if let Some(log) = &self.prediction_log {
            if let Err(e) = log.record(event, &prediction) {
                warn!(path = %log.path().display(), error = %e, "Failed to write prediction log");
            }
        }

        Ok(Verdict::new(best.name, prediction))
    }

    /// Score one chunk against every registry model.
    ///
    /// Preprocessor problems fail the chunk; model problems become that
    /// model's outcome.
    pub fn score_chunk(&self, chunk: &EventChunk) -> Result<ChunkScores> {
        let preprocessor = self.registry.preprocessor()?;
        let features = self.extractor.extract_all(&chunk.events);
        let encoded = preprocessor.transform_batch(&features)?;

        let outcomes = self
            .registry
            .entries()
            .iter()
            .map(|entry| {
                let outcome = self.run_model(&entry.name, &encoded);
                if let Err(failure) = &outcome {
                    warn!(model = %entry.name, rows = chunk.len(), error = %failure, "Model failed on batch chunk");
                    self.metrics.record_model_failure(&entry.name);
                }
                (entry.name.clone(), outcome)
            })
            .collect();

        Ok(ChunkScores {
            row_indices: chunk.indices.clone(),
            outcomes,
        })
    }

    fn run_model(&self, name: &str, encoded: &EncodedBatch) -> ModelOutcome {
        let loaded = self.registry.model(name)?;
        // an empty chunk only proves the artifact loads
        if encoded.is_empty() {
            return Ok(ModelPredictions::new(Vec::new(), Vec::new()));
        }

        let start = Instant::now();
        let output = loaded
            .model
            .predict(encoded)
            .map_err(|e| ModelFailure::failed(format!("{e:#}")))?;
        self.metrics.record_model_time(name, start.elapsed());

        if output.len() != encoded.rows {
            return Err(ModelFailure::failed(format!(
                "model returned {} predictions for {} rows",
                output.len(),
                encoded.rows
            )));
        }
        Ok(ModelPredictions::from_output(output, self.threshold))
    }

    /// Assemble scored chunks into the batch report
    pub fn finish_batch(&self, mut chunks: Vec<ChunkScores>, dropped_rows: Vec<usize>) -> Result<BatchReport> {
        if chunks.is_empty() {
            chunks.push(self.score_chunk(&EventChunk::default())?);
        }
        let report = BatchReport::from_chunks(chunks, dropped_rows, &self.model_names());

        self.metrics
            .record_batch(report.total_records, report.dropped_rows.len());
        if let Some((_, selected)) = report.selected_model() {
            self.metrics.record_scores(&selected.fraud_probabilities);
        }

        info!(
            batch_id = %report.batch_id,
            rows = report.total_records,
            dropped = report.dropped_rows.len(),
            successful_models = report.successful().count(),
            "Batch scored"
        );
        Ok(report)
    }

    /// Score in-memory events as one batch
    pub fn predict_batch(&self, events: &[RawEvent]) -> Result<BatchReport> {
        let chunk = EventChunk::from_events(events.to_vec());
        let scores = self.score_chunk(&chunk)?;
        self.finish_batch(vec![scores], Vec::new())
    }
}
