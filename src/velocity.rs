//! Click-velocity detection over the tail of the click log

use crate::config::VelocityConfig;
use crate::event_log::EventLogEntry;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityDecision {
    pub is_fraud: bool,
    /// Prior clicks inside the window
    pub recent_clicks: usize,
}

/// Flags a click when too many prior clicks landed inside the trailing window
#[derive(Debug, Clone)]
pub struct VelocityDetector {
    window: Duration,
    click_threshold: usize,
}

impl VelocityDetector {
    pub fn new(config: &VelocityConfig) -> Self {
        Self {
            window: Duration::milliseconds((config.window_secs * 1000.0).round() as i64),
            click_threshold: config.click_threshold,
        }
    }

    /// Window is `[now - window, now]`, both ends inclusive. Clicks logged
    /// after `now` do not count.
    pub fn in_window(&self, now: DateTime<Utc>, click: DateTime<Utc>) -> bool {
        click <= now && now - click <= self.window
    }

    /// Decide on a click at `now` given the raw tail lines of the log.
    ///
    /// Corrupt lines are skipped.
    pub fn decide<'a>(&self, now: DateTime<Utc>, tail: impl IntoIterator<Item = &'a str>) -> VelocityDecision {
        let recent_clicks = tail
            .into_iter()
            .filter_map(|line| match EventLogEntry::parse_line(line) {
                Ok(entry) => Some(entry.timestamp),
                Err(corruption) => {
                    debug!(error = %corruption, "Skipping click log line");
                    None
                }
            })
            .filter(|&ts| self.in_window(now, ts))
            .count();

        VelocityDecision {
            is_fraud: recent_clicks >= self.click_threshold,
            recent_clicks,
        }
    }
}
