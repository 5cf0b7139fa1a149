//! Feature derivation for click-fraud model inference.
//!
//! Turns a parsed [`RawEvent`] into a [`FeatureVector`]: the raw fields plus
//! temporal, behavioral and heuristic risk features. The derivation matches the
//! one the models were trained against and must not be re-fit at inference time.

use crate::types::event::{RawEvent, CATEGORICAL_FIELDS, FLAG_FIELDS, NUMERIC_FIELDS};
use chrono::{Datelike, Timelike};
use serde::Serialize;

/// Guards `dwell_speed` against zero mouse movement
pub const DWELL_EPSILON: f64 = 1e-5;

/// Weights of the heuristic fraud risk score
pub const RISK_WEIGHT_BOT: f64 = 0.4;
pub const RISK_WEIGHT_REPUTATION: f64 = 0.3;
pub const RISK_WEIGHT_VPN: f64 = 0.2;
pub const RISK_WEIGHT_PROXY: f64 = 0.1;

/// Derived numeric columns, in the order they are appended
pub const DERIVED_FIELDS: [&str; 7] = [
    "hour",
    "day_of_week",
    "is_weekend",
    "month",
    "interaction_intensity",
    "dwell_speed",
    "fraud_risk_score",
];

/// Risk contribution of the device/IP reputation label
pub fn reputation(label: &str) -> f64 {
    match label {
        "Good" => 0.0,
        "Suspicious" => 0.5,
        "Bad" => 1.0,
        _ => 0.5,
    }
}

/// Weighted heuristic risk in [0, 1] for in-range inputs
pub fn fraud_risk_score(bot_likelihood: f64, ip_reputation: &str, vpn: u8, proxy: u8) -> f64 {
    RISK_WEIGHT_BOT * bot_likelihood
        + RISK_WEIGHT_REPUTATION * reputation(ip_reputation)
        + RISK_WEIGHT_VPN * f64::from(vpn)
        + RISK_WEIGHT_PROXY * f64::from(proxy)
}

/// A raw event plus its derived features
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    #[serde(flatten)]
    pub raw: RawEvent,
    pub hour: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub is_weekend: u8,
    pub month: u32,
    pub interaction_intensity: f64,
    pub dwell_speed: f64,
    pub fraud_risk_score: f64,
}

impl FeatureVector {
    /// Numeric column by name, raw or derived
    pub fn numeric(&self, name: &str) -> Option<f64> {
        let raw = &self.raw;
        let value = match name {
            "scroll_depth" => raw.scroll_depth,
            "mouse_movement" => raw.mouse_movement,
            "keystrokes_detected" => raw.keystrokes_detected,
            "click_duration" => raw.click_duration,
            "bot_likelihood_score" => raw.bot_likelihood_score,
            "VPN_usage" => f64::from(raw.vpn_usage),
            "proxy_usage" => f64::from(raw.proxy_usage),
            "hour" => f64::from(self.hour),
            "day_of_week" => f64::from(self.day_of_week),
            "is_weekend" => f64::from(self.is_weekend),
            "month" => f64::from(self.month),
            "interaction_intensity" => self.interaction_intensity,
            "dwell_speed" => self.dwell_speed,
            "fraud_risk_score" => self.fraud_risk_score,
            _ => return None,
        };
        Some(value)
    }

    /// Categorical column by name
    pub fn categorical(&self, name: &str) -> Option<&str> {
        let raw = &self.raw;
        let value = match name {
            "device_type" => &raw.device_type,
            "browser" => &raw.browser,
            "operating_system" => &raw.operating_system,
            "ad_position" => &raw.ad_position,
            "device_ip_reputation" => &raw.device_ip_reputation,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Every numeric column name a feature vector exposes
    pub fn numeric_columns() -> impl Iterator<Item = &'static str> {
        NUMERIC_FIELDS
            .into_iter()
            .chain(FLAG_FIELDS)
            .chain(DERIVED_FIELDS)
    }

    /// Every categorical column name a feature vector exposes
    pub fn categorical_columns() -> impl Iterator<Item = &'static str> {
        CATEGORICAL_FIELDS.into_iter()
    }
}

/// Stateless feature extractor shared by the single and batch paths
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Derive features for one event. Total and pure: the event is only read.
    pub fn extract(&self, event: &RawEvent) -> FeatureVector {
        let ts = event.timestamp;
        let day_of_week = ts.weekday().num_days_from_monday();

        FeatureVector {
            hour: ts.hour(),
            day_of_week,
            is_weekend: u8::from(day_of_week >= 5),
            month: ts.month(),
            interaction_intensity: event.scroll_depth
                * event.mouse_movement
                * event.keystrokes_detected,
            dwell_speed: event.click_duration / (event.mouse_movement + DWELL_EPSILON),
            fraud_risk_score: fraud_risk_score(
                event.bot_likelihood_score,
                &event.device_ip_reputation,
                event.vpn_usage,
                event.proxy_usage,
            ),
            raw: event.clone(),
        }
    }

    /// Derive features for many events; output order and count match the input.
    pub fn extract_all(&self, events: &[RawEvent]) -> Vec<FeatureVector> {
        events.iter().map(|e| self.extract(e)).collect()
    }

    /// Number of columns in a feature vector.
    pub fn feature_count(&self) -> usize {
        self.feature_names().len()
    }

    /// Column names, categorical first then numeric.
    pub fn feature_names(&self) -> Vec<&'static str> {
        FeatureVector::categorical_columns()
            .chain(FeatureVector::numeric_columns())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::event::parse_timestamp;

    pub(crate) fn event_at(timestamp: &str) -> RawEvent {
        RawEvent {
            timestamp: parse_timestamp(timestamp).unwrap(),
            device_type: "Mobile".to_string(),
            browser: "Unknown".to_string(),
            operating_system: "Android".to_string(),
            ad_position: "top".to_string(),
            device_ip_reputation: "Suspicious".to_string(),
            scroll_depth: 10.0,
            mouse_movement: 5.0,
            keystrokes_detected: 2.0,
            click_duration: 0.1,
            bot_likelihood_score: 0.85,
            vpn_usage: 1,
            proxy_usage: 1,
        }
    }

    #[test]
    fn test_temporal_features() {
        let extractor = FeatureExtractor::new();
        // 2024-03-09 is a Saturday
        let fv = extractor.extract(&event_at("2024-03-09 14:30:00"));
        assert_eq!(fv.hour, 14);
        assert_eq!(fv.day_of_week, 5);
        assert_eq!(fv.is_weekend, 1);
        assert_eq!(fv.month, 3);

        let weekday = extractor.extract(&event_at("2024-03-11 02:00:00"));
        assert_eq!(weekday.day_of_week, 0);
        assert_eq!(weekday.is_weekend, 0);
    }

    #[test]
    fn test_behavioral_features() {
        let fv = FeatureExtractor::new().extract(&event_at("2024-03-09 14:30:00"));
        assert_eq!(fv.interaction_intensity, 100.0);
        assert!((fv.dwell_speed - 0.1 / (5.0 + DWELL_EPSILON)).abs() < 1e-12);
    }

    #[test]
    fn test_dwell_speed_without_mouse_movement() {
        let mut event = event_at("2024-03-09 14:30:00");
        event.mouse_movement = 0.0;
        let fv = FeatureExtractor::new().extract(&event);
        assert!(fv.dwell_speed.is_finite());
        assert!((fv.dwell_speed - 0.1 / DWELL_EPSILON).abs() < 1e-6);
    }

    #[test]
    fn test_risk_score_reference_event() {
        let fv = FeatureExtractor::new().extract(&event_at("2024-03-09 14:30:00"));
        // 0.4*0.85 + 0.3*0.5 + 0.2*1 + 0.1*1
        assert!((fv.fraud_risk_score - 0.79).abs() < 1e-9);
    }

    #[test]
    fn test_risk_score_all_combinations() {
        for (label, rep) in [("Good", 0.0), ("Suspicious", 0.5), ("Bad", 1.0), ("Neutral", 0.5), ("unknown", 0.5)] {
            for vpn in [0u8, 1] {
                for proxy in [0u8, 1] {
                    for bot in [0.0, 0.25, 1.0] {
                        let expected = 0.4 * bot + 0.3 * rep + 0.2 * f64::from(vpn) + 0.1 * f64::from(proxy);
                        let got = fraud_risk_score(bot, label, vpn, proxy);
                        assert!((got - expected).abs() < 1e-12, "{label} {vpn} {proxy} {bot}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_extraction_is_deterministic_and_pure() {
        let extractor = FeatureExtractor::new();
        let events = vec![
            event_at("2024-03-09 14:30:00"),
            event_at("2024-12-25 23:59:59"),
        ];
        let snapshot = events.clone();

        let first = extractor.extract_all(&events);
        let reversed: Vec<_> = events.iter().rev().map(|e| extractor.extract(e)).collect();
        let second = extractor.extract_all(&events);

        assert_eq!(events, snapshot);
        assert_eq!(first, second);
        assert_eq!(first[0], reversed[1]);
        assert_eq!(first.len(), events.len());
    }

    #[test]
    fn test_column_lookup() {
        let fv = FeatureExtractor::new().extract(&event_at("2024-03-09 14:30:00"));
        assert_eq!(fv.numeric("VPN_usage"), Some(1.0));
        assert_eq!(fv.numeric("hour"), Some(14.0));
        assert_eq!(fv.categorical("browser"), Some("Unknown"));
        assert_eq!(fv.numeric("device_type"), None);
        assert_eq!(fv.categorical("nope"), None);
    }

    #[test]
    fn test_feature_count() {
        let extractor = FeatureExtractor::new();
        assert_eq!(extractor.feature_count(), 19);
        assert_eq!(extractor.feature_names()[0], "device_type");
    }
}
