//! Click Fraud Pipeline Library
//!
//! Scores ad-click events for fraud with pre-trained models, single or in
//! chunked batches, and flags click bursts from the live click log.

pub mod batch;
pub mod config;
pub mod error;
pub mod event_log;
pub mod feature_extractor;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod prediction_log;
pub mod preprocessor;
pub mod types;
pub mod velocity;

pub use batch::{BatchReader, EventChunk};
pub use config::AppConfig;
pub use error::{ModelFailure, ScoringError};
pub use event_log::EventLog;
pub use feature_extractor::FeatureExtractor;
pub use ingest::ClickIngestor;
pub use metrics::PipelineMetrics;
pub use models::{BatchReport, ModelRegistry, ScoringEngine};
pub use preprocessor::Preprocessor;
pub use types::{ClickEvent, ClickVerdict, RawEvent, Verdict};
pub use velocity::VelocityDetector;
