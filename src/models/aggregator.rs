//! Per-model result assembly for batch scoring

use crate::error::ModelFailure;
use crate::types::prediction::ModelPredictions;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Outcome of one model over a set of rows
pub type ModelOutcome = Result<ModelPredictions, ModelFailure>;

/// Scores for one chunk of upload rows, one outcome per registry model
#[derive(Debug, Clone)]
pub struct ChunkScores {
    /// Upload row index of every scored row
    pub row_indices: Vec<usize>,
    /// In registry order
    pub outcomes: Vec<(String, ModelOutcome)>,
}

/// Result of scoring a whole batch against every registry model
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub timestamp: DateTime<Utc>,
    /// Rows that were scored
    pub total_records: usize,
    /// Upload rows excluded before scoring (missing or unparseable
    /// timestamp, bytes that are not UTF-8)
    pub dropped_rows: Vec<usize>,
    #[serde(skip)]
    pub row_indices: Vec<usize>,
    #[serde(serialize_with = "serialize_outcomes")]
    pub predictions: Vec<(String, ModelOutcome)>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutcomeRef<'a> {
    Ok(&'a ModelPredictions),
    Err(&'a ModelFailure),
}

fn serialize_outcomes<S: Serializer>(
    outcomes: &[(String, ModelOutcome)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(outcomes.len()))?;
    for (name, outcome) in outcomes {
        let value = match outcome {
            Ok(predictions) => OutcomeRef::Ok(predictions),
            Err(failure) => OutcomeRef::Err(failure),
        };
        map.serialize_entry(name, &value)?;
    }
    map.end()
}

/// Per-model headline numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReport {
    /// Stitch chunk results back together in upload order.
    ///
    /// A model that failed on any chunk is reported with its first failure;
    /// the other models keep their full columns.
    pub fn from_chunks(chunks: Vec<ChunkScores>, dropped_rows: Vec<usize>, model_order: &[String]) -> Self {
        let row_indices: Vec<usize> = chunks
            .iter()
            .flat_map(|c| c.row_indices.iter().copied())
            .collect();

        let mut columns: Vec<Result<(Vec<f64>, Vec<bool>), ModelFailure>> = model_order
            .iter()
            .map(|_| Ok((Vec::with_capacity(row_indices.len()), Vec::with_capacity(row_indices.len()))))
            .collect();

        for chunk in chunks {
            for (name, outcome) in chunk.outcomes {
                let Some(slot) = model_order.iter().position(|m| *m == name) else {
                    continue;
                };
                let column = &mut columns[slot];
                match outcome {
                    Ok(predictions) => {
                        if let Ok((probs, flags)) = column {
                            probs.extend(predictions.fraud_probabilities);
                            flags.extend(predictions.is_fraud);
                        }
                    }
                    Err(failure) => {
                        if column.is_ok() {
                            *column = Err(failure);
                        }
                    }
                }
            }
        }

        let predictions = model_order
            .iter()
            .cloned()
            .zip(columns)
            .map(|(name, column)| {
                let outcome = column.map(|(probs, flags)| ModelPredictions::new(probs, flags));
                (name, outcome)
            })
            .collect();

        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            total_records: row_indices.len(),
            dropped_rows,
            row_indices,
            predictions,
        }
    }

    /// First model, in registry order, whose result has no error
    pub fn selected_model(&self) -> Option<(&str, &ModelPredictions)> {
        self.successful().next()
    }

    pub fn successful(&self) -> impl Iterator<Item = (&str, &ModelPredictions)> {
        self.predictions
            .iter()
            .filter_map(|(name, outcome)| outcome.as_ref().ok().map(|p| (name.as_str(), p)))
    }

    pub fn outcome(&self, model: &str) -> Option<&ModelOutcome> {
        self.predictions
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, outcome)| outcome)
    }

    /// Fraction of successful models flagging each row; empty when none succeeded
    pub fn consensus(&self) -> Vec<f64> {
        let voters: Vec<&ModelPredictions> = self.successful().map(|(_, p)| p).collect();
        if voters.is_empty() {
            return Vec::new();
        }
        (0..self.total_records)
            .map(|row| {
                let votes = voters.iter().filter(|p| p.is_fraud[row]).count();
                votes as f64 / voters.len() as f64
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<ModelSummary> {
        self.predictions
            .iter()
            .map(|(name, outcome)| match outcome {
                Ok(p) => ModelSummary {
                    model: name.clone(),
                    fraud_count: Some(p.fraud_count),
                    fraud_percentage: Some(p.fraud_percentage),
                    error: None,
                },
                Err(failure) => ModelSummary {
                    model: name.clone(),
                    fraud_count: None,
                    fraud_percentage: None,
                    error: Some(failure.to_string()),
                },
            })
            .collect()
    }
}
