//! JSON-lines audit trail of single-event predictions

use crate::error::Result;
use crate::types::event::RawEvent;
use crate::types::prediction::Prediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub input: RawEvent,
    pub prediction: Prediction,
}

pub struct PredictionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl PredictionLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Prediction log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn record(&self, input: &RawEvent, prediction: &Prediction) -> Result<()> {
        let record = AuditRecord {
            timestamp: Utc::now(),
            input: input.clone(),
            prediction: *prediction,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("prediction log lock poisoned"))?;
        file.write_all(&line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_extractor::tests::event_at;

    #[test]
    fn test_records_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::open(dir.path().join("logs/predictions.jsonl")).unwrap();
        let event = event_at("2024-03-02T10:00:00Z");

        log.record(&event, &Prediction::from_probability(0.9, 0.5)).unwrap();
        log.record(&event, &Prediction::from_probability(0.1, 0.5)).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let records: Vec<AuditRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].prediction.is_fraud);
        assert_eq!(records[1].input, event);
    }
}
