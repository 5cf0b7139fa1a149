//! Click ingestion: velocity decision plus append, serialized per log

use crate::config::VelocityConfig;
use crate::error::{Result, ScoringError};
use crate::event_log::{EventLog, EventLogEntry};
use crate::metrics::PipelineMetrics;
use crate::types::event::ClickEvent;
use crate::types::prediction::ClickVerdict;
use crate::velocity::VelocityDetector;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub struct ClickIngestor {
    /// Held across tail read, decision and append
    log: Mutex<EventLog>,
    detector: VelocityDetector,
    metrics: Arc<PipelineMetrics>,
}

impl ClickIngestor {
    pub fn new(config: &VelocityConfig, metrics: Arc<PipelineMetrics>) -> Result<Self> {
        let log = EventLog::open(&config.log_path, config.tail_window)?;
        info!(
            log = %log.path().display(),
            tail_window = config.tail_window,
            click_threshold = config.click_threshold,
            window_secs = config.window_secs,
            "Click ingestor ready"
        );
        Ok(Self {
            log: Mutex::new(log),
            detector: VelocityDetector::new(config),
            metrics,
        })
    }

    /// Decide on the click and append it to the log as one atomic step
    pub fn ingest(&self, click: &ClickEvent) -> Result<ClickVerdict> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| ScoringError::Io(std::io::Error::other("click log lock poisoned")))?;

        let decision = self.detector.decide(click.timestamp, log.tail());
        log.append(&EventLogEntry::from_click(click, decision.is_fraud))?;
        drop(log);

        self.metrics.record_click(decision.is_fraud);
        if decision.is_fraud {
            info!(
                ad_id = %click.ad_id,
                recent_clicks = decision.recent_clicks,
                "Click velocity exceeded, click flagged"
            );
        } else {
            debug!(ad_id = %click.ad_id, recent_clicks = decision.recent_clicks, "Click ingested");
        }

        Ok(ClickVerdict {
            is_fraud: decision.is_fraud,
            recent_clicks: decision.recent_clicks,
            ad_id: click.ad_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::tests::click_at;
    use std::sync::atomic::Ordering;

    fn config(dir: &std::path::Path) -> VelocityConfig {
        VelocityConfig {
            log_path: dir.join("live_clicks.csv").to_string_lossy().into_owned(),
            ..VelocityConfig::default()
        }
    }

    #[test]
    fn test_burst_is_flagged_on_fourth_click() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = ClickIngestor::new(&config(dir.path()), Arc::new(PipelineMetrics::new())).unwrap();

        let verdicts: Vec<ClickVerdict> = [
            "2024-03-02T10:00:00.000Z",
            "2024-03-02T10:00:00.400Z",
            "2024-03-02T10:00:00.800Z",
            "2024-03-02T10:00:01.200Z",
        ]
        .iter()
        .map(|ts| ingestor.ingest(&click_at(ts)).unwrap())
        .collect();

        let flags: Vec<bool> = verdicts.iter().map(|v| v.is_fraud).collect();
        assert_eq!(flags, vec![false, false, false, true]);
        assert_eq!(verdicts[3].recent_clicks, 3);

        let entries = EventLog::read_all(dir.path().join("live_clicks.csv")).unwrap();
        assert_eq!(entries.len(), 4);
        assert!(entries[3].is_fraud);
    }

    #[test]
    fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(PipelineMetrics::new());
        {
            let ingestor = ClickIngestor::new(&config(dir.path()), Arc::clone(&metrics)).unwrap();
            for ts in ["2024-03-02T10:00:00.000Z", "2024-03-02T10:00:00.500Z", "2024-03-02T10:00:01.000Z"] {
                ingestor.ingest(&click_at(ts)).unwrap();
            }
        }

        let ingestor = ClickIngestor::new(&config(dir.path()), Arc::clone(&metrics)).unwrap();
        let verdict = ingestor.ingest(&click_at("2024-03-02T10:00:01.500Z")).unwrap();
        assert!(verdict.is_fraud);
        assert_eq!(metrics.clicks_flagged.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_concurrent_ingestion_keeps_records_whole() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = Arc::new(
            ClickIngestor::new(&config(dir.path()), Arc::new(PipelineMetrics::new())).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let ingestor = Arc::clone(&ingestor);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        // spread far apart so no burst is detected
                        let ts = chrono::DateTime::from_timestamp(1_700_000_000 + (worker * 1000 + i * 10), 0)
                            .unwrap()
                            .to_rfc3339();
                        ingestor.ingest(&click_at(&ts)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(dir.path().join("live_clicks.csv")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 201);
        for line in &lines[1..] {
            assert!(EventLogEntry::parse_line(line).is_ok(), "torn record {line}");
        }
    }
}
