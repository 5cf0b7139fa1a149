//! Click event records as received from callers

use crate::error::{Result, ScoringError};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Categorical fields of a raw event
pub const CATEGORICAL_FIELDS: [&str; 5] = [
    "device_type",
    "browser",
    "operating_system",
    "ad_position",
    "device_ip_reputation",
];

/// Continuous numeric fields of a raw event
pub const NUMERIC_FIELDS: [&str; 5] = [
    "scroll_depth",
    "mouse_movement",
    "keystrokes_detected",
    "click_duration",
    "bot_likelihood_score",
];

/// 0/1 flags of a raw event
pub const FLAG_FIELDS: [&str; 2] = ["VPN_usage", "proxy_usage"];

pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Value placed in categorical columns that carry no value
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Fields every event must carry, timestamp excluded
pub fn required_fields() -> impl Iterator<Item = &'static str> {
    CATEGORICAL_FIELDS
        .into_iter()
        .chain(NUMERIC_FIELDS)
        .chain(FLAG_FIELDS)
}

/// Column set a batch upload must provide
pub fn batch_required_columns() -> Vec<&'static str> {
    std::iter::once(TIMESTAMP_FIELD)
        .chain(required_fields())
        .collect()
}

/// How an absent timestamp is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Absent timestamp is a validation error
    Required,
    /// Absent timestamp means "received now"
    DefaultNow,
}

/// A single field as seen by the event parser
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
    Null,
}

/// Anything events can be read from: JSON objects, CSV rows
pub trait FieldSource {
    /// `None` when the field is absent, `Some(FieldValue::Null)` when present but empty
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

impl FieldSource for Map<String, Value> {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        self.get(name).map(|value| match value {
            Value::String(s) => FieldValue::Text(s),
            Value::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Null),
            Value::Bool(b) => FieldValue::Number(if *b { 1.0 } else { 0.0 }),
            _ => FieldValue::Null,
        })
    }
}

/// Column positions of a CSV upload
#[derive(Debug, Clone)]
pub struct RowSchema {
    headers: StringRecord,
    index: HashMap<String, usize>,
}

impl RowSchema {
    pub fn new(headers: StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Self { headers, index }
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Columns from `required` that the upload lacks
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|name| !self.index.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    pub fn row<'a>(&'a self, record: &'a StringRecord) -> CsvRow<'a> {
        CsvRow {
            schema: self,
            record,
        }
    }
}

/// One CSV record viewed through its header
pub struct CsvRow<'a> {
    schema: &'a RowSchema,
    record: &'a StringRecord,
}

impl FieldSource for CsvRow<'_> {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        let position = self.schema.position(name)?;
        match self.record.get(position).map(str::trim) {
            None | Some("") => Some(FieldValue::Null),
            Some(text) => Some(FieldValue::Text(text)),
        }
    }
}

/// Parse the timestamp formats seen in uploads and click payloads.
///
/// Offsets are normalized to UTC; naive timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Ad-interaction record as received. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    pub device_type: String,
    pub browser: String,
    pub operating_system: String,
    pub ad_position: String,
    pub device_ip_reputation: String,
    pub scroll_depth: f64,
    pub mouse_movement: f64,
    pub keystrokes_detected: f64,
    pub click_duration: f64,
    /// Upstream bot classifier output in [0, 1]
    pub bot_likelihood_score: f64,
    #[serde(rename = "VPN_usage")]
    pub vpn_usage: u8,
    pub proxy_usage: u8,
}

impl RawEvent {
    /// Parse a JSON object, checking every required field up front
    pub fn from_json(value: &Value, policy: TimestampPolicy) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| ScoringError::InvalidField {
            field: "event".to_string(),
            reason: "expected a JSON object".to_string(),
        })?;
        Self::from_source(object, policy)
    }

    pub fn from_record(schema: &RowSchema, record: &StringRecord) -> Result<Self> {
        Self::from_source(&schema.row(record), TimestampPolicy::Required)
    }

    pub fn from_source<S: FieldSource + ?Sized>(source: &S, policy: TimestampPolicy) -> Result<Self> {
        let mut missing: Vec<String> = Vec::new();
        if policy == TimestampPolicy::Required && source.field(TIMESTAMP_FIELD).is_none() {
            missing.push(TIMESTAMP_FIELD.to_string());
        }
        missing.extend(
            required_fields()
                .filter(|name| source.field(name).is_none())
                .map(str::to_string),
        );
        if !missing.is_empty() {
            return Err(ScoringError::Validation { missing });
        }

        let timestamp = match source.field(TIMESTAMP_FIELD) {
            Some(FieldValue::Text(raw)) => {
                parse_timestamp(raw).ok_or_else(|| ScoringError::InvalidField {
                    field: TIMESTAMP_FIELD.to_string(),
                    reason: format!("unparseable timestamp {raw:?}"),
                })?
            }
            Some(_) if policy == TimestampPolicy::Required => {
                return Err(ScoringError::InvalidField {
                    field: TIMESTAMP_FIELD.to_string(),
                    reason: "empty timestamp".to_string(),
                })
            }
            _ => Utc::now(),
        };

        Ok(Self {
            timestamp,
            device_type: categorical(source, "device_type"),
            browser: categorical(source, "browser"),
            operating_system: categorical(source, "operating_system"),
            ad_position: categorical(source, "ad_position"),
            device_ip_reputation: categorical(source, "device_ip_reputation"),
            scroll_depth: numeric(source, "scroll_depth"),
            mouse_movement: numeric(source, "mouse_movement"),
            keystrokes_detected: numeric(source, "keystrokes_detected"),
            click_duration: numeric(source, "click_duration"),
            bot_likelihood_score: numeric(source, "bot_likelihood_score"),
            vpn_usage: flag(source, "VPN_usage"),
            proxy_usage: flag(source, "proxy_usage"),
        })
    }
}

fn categorical<S: FieldSource + ?Sized>(source: &S, name: &str) -> String {
    match source.field(name) {
        Some(FieldValue::Text(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(FieldValue::Number(n)) => n.to_string(),
        _ => UNKNOWN_CATEGORY.to_string(),
    }
}

/// Non-numeric values coerce to 0
fn numeric<S: FieldSource + ?Sized>(source: &S, name: &str) -> f64 {
    let value = match source.field(name) {
        Some(FieldValue::Number(n)) => n,
        Some(FieldValue::Text(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn flag<S: FieldSource + ?Sized>(source: &S, name: &str) -> u8 {
    let value = numeric(source, name);
    if value.round() >= 1.0 {
        1
    } else {
        0
    }
}

/// Click reported by the live ad surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub timestamp: DateTime<Utc>,
    pub device_type: String,
    pub browser: String,
    pub operating_system: String,
    pub ad_position: String,
    pub scroll_depth: f64,
    pub mouse_movement: f64,
    pub click_duration: f64,
    pub ad_id: String,
}

const CLICK_REQUIRED_FIELDS: [&str; 8] = [
    "timestamp",
    "device_type",
    "browser",
    "operating_system",
    "ad_position",
    "scroll_depth",
    "mouse_movement",
    "click_duration",
];

impl ClickEvent {
    /// Parse a click payload; `ad_id` falls back to "unknown"
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| ScoringError::InvalidField {
            field: "click".to_string(),
            reason: "expected a JSON object".to_string(),
        })?;

        let missing: Vec<String> = CLICK_REQUIRED_FIELDS
            .iter()
            .filter(|name| object.field(name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ScoringError::Validation { missing });
        }

        let timestamp = match object.field(TIMESTAMP_FIELD) {
            Some(FieldValue::Text(raw)) => parse_timestamp(raw),
            _ => None,
        }
        .ok_or_else(|| ScoringError::InvalidField {
            field: TIMESTAMP_FIELD.to_string(),
            reason: "expected an ISO-8601 timestamp".to_string(),
        })?;

        Ok(Self {
            timestamp,
            device_type: categorical(object, "device_type"),
            browser: categorical(object, "browser"),
            operating_system: categorical(object, "operating_system"),
            ad_position: categorical(object, "ad_position"),
            scroll_depth: numeric(object, "scroll_depth"),
            mouse_movement: numeric(object, "mouse_movement"),
            click_duration: numeric(object, "click_duration"),
            ad_id: categorical(object, "ad_id"),
        })
    }

    /// Timestamp as written to the click log
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
