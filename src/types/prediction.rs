//! Prediction results returned by the scoring engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw output of one model over a batch of encoded rows
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// Fraud-class probability per row
    Probabilities(Vec<f64>),
    /// Models that only expose hard labels
    Labels(Vec<bool>),
}

impl ModelOutput {
    pub fn len(&self) -> usize {
        match self {
            ModelOutput::Probabilities(p) => p.len(),
            ModelOutput::Labels(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split into (probabilities, fraud flags) using the decision threshold.
    ///
    /// Hard labels are reported as probability 1.0 / 0.0 and keep their label.
    pub fn into_columns(self, threshold: f64) -> (Vec<f64>, Vec<bool>) {
        match self {
            ModelOutput::Probabilities(probs) => {
                let flags = probs.iter().map(|&p| p >= threshold).collect();
                (probs, flags)
            }
            ModelOutput::Labels(labels) => {
                let probs = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
                (probs, labels)
            }
        }
    }
}

/// Decision for one event
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub is_fraud: bool,
    pub fraud_probability: f64,
    pub threshold: f64,
}

impl Prediction {
    pub fn from_probability(fraud_probability: f64, threshold: f64) -> Self {
        Self {
            is_fraud: fraud_probability >= threshold,
            fraud_probability,
            threshold,
        }
    }
}

/// Single-event scoring response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Artifact that produced the decision
    pub model: String,
    pub prediction: Prediction,
}

impl Verdict {
    pub fn new(model: String, prediction: Prediction) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            model,
            prediction,
        }
    }
}

/// Per-row results of one successful model across a whole batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPredictions {
    pub is_fraud: Vec<bool>,
    pub fraud_probabilities: Vec<f64>,
    pub fraud_count: usize,
    /// Percentage of rows flagged, rounded to 2 decimals
    pub fraud_percentage: f64,
}

impl ModelPredictions {
    pub fn new(fraud_probabilities: Vec<f64>, is_fraud: Vec<bool>) -> Self {
        let fraud_count = is_fraud.iter().filter(|&&f| f).count();
        let fraud_percentage = percentage(fraud_count, is_fraud.len());
        Self {
            is_fraud,
            fraud_probabilities,
            fraud_count,
            fraud_percentage,
        }
    }

    pub fn from_output(output: ModelOutput, threshold: f64) -> Self {
        let (probs, flags) = output.into_columns(threshold);
        Self::new(probs, flags)
    }

    pub fn len(&self) -> usize {
        self.is_fraud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_fraud.is_empty()
    }
}

/// `100 * part / total` rounded to 2 decimals; 0 for an empty batch
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

/// Click-ingestion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickVerdict {
    pub is_fraud: bool,
    /// Prior clicks found inside the trailing window
    pub recent_clicks: usize,
    pub ad_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(Prediction::from_probability(0.5, 0.5).is_fraud);
        assert!(!Prediction::from_probability(0.4999, 0.5).is_fraud);
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 5), 100.0);
    }

    #[test]
    fn test_labels_keep_native_decision() {
        let preds =
            ModelPredictions::from_output(ModelOutput::Labels(vec![true, false, true, true]), 0.5);
        assert_eq!(preds.fraud_probabilities, vec![1.0, 0.0, 1.0, 1.0]);
        assert_eq!(preds.fraud_count, 3);
        assert_eq!(preds.fraud_percentage, 75.0);
    }

    #[test]
    fn test_verdict_serialization() {
        let verdict = Verdict::new(
            "fraud_detection_model.json".to_string(),
            Prediction::from_probability(0.8, 0.5),
        );
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["prediction"]["is_fraud"], true);
        assert_eq!(json["prediction"]["threshold"], 0.5);
    }
}
