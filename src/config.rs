//! Configuration management for the click-fraud pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub models: ModelsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub velocity: VelocityConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One named model in the batch ensemble
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelEntry {
    /// Model name reported in results (random_forest, xgboost, neural_network)
    pub name: String,
    /// Artifact path, relative to `models_dir`
    pub path: String,
}

impl ModelEntry {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing every trained artifact
    pub models_dir: String,
    /// Preprocessing artifact, relative to `models_dir`
    #[serde(default = "default_preprocessor")]
    pub preprocessor: String,
    /// Candidates for single-event scoring, richest format first
    #[serde(default = "default_best_model")]
    pub best_model: Vec<String>,
    /// Models run by batch scoring, in reporting order
    #[serde(default = "default_registry")]
    pub registry: Vec<ModelEntry>,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_preprocessor() -> String {
    "preprocessor.json".to_string()
}

fn default_best_model() -> Vec<String> {
    vec![
        "fraud_detection_model.onnx".to_string(),
        "fraud_detection_model.json".to_string(),
    ]
}

fn default_registry() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("random_forest", "random_forest_model/model.json"),
        ModelEntry::new("xgboost", "xgboost_model/model.json"),
        ModelEntry::new("neural_network", "fraud_detection_model.onnx"),
    ]
}

fn default_onnx_threads() -> usize {
    1
}

impl ModelsConfig {
    pub fn resolve(&self, relative: &str) -> PathBuf {
        Path::new(&self.models_dir).join(relative)
    }

    pub fn preprocessor_path(&self) -> PathBuf {
        self.resolve(&self.preprocessor)
    }

    pub fn training_report_path(&self) -> PathBuf {
        self.resolve("training_results.json")
    }
}

/// Decision threshold shared by every model
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

/// Click-velocity detection
#[derive(Debug, Clone, Deserialize)]
pub struct VelocityConfig {
    /// Append-only click log
    #[serde(default = "default_log_path")]
    pub log_path: String,
    /// How many trailing log entries are inspected per click
    #[serde(default = "default_tail_window")]
    pub tail_window: usize,
    /// Clicks inside the window at which the new click is flagged
    #[serde(default = "default_click_threshold")]
    pub click_threshold: usize,
    /// Trailing window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: f64,
}

fn default_log_path() -> String {
    "data/live_clicks.csv".to_string()
}

fn default_tail_window() -> usize {
    20
}

fn default_click_threshold() -> usize {
    3
}

fn default_window_secs() -> f64 {
    2.0
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            tail_window: default_tail_window(),
            click_threshold: default_click_threshold(),
            window_secs: default_window_secs(),
        }
    }
}

/// Batch pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Number of chunks scored concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rows per batch chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_workers() -> usize {
    4
}

fn default_chunk_size() -> usize {
    1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// JSON-lines audit log of single predictions
    #[serde(default)]
    pub prediction_log: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            prediction_log: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.velocity.tail_window == 0 {
            anyhow::bail!("velocity.tail_window must be at least 1");
        }
        if self.velocity.window_secs <= 0.0 {
            anyhow::bail!("velocity.window_secs must be positive");
        }
        if !(0.0..=1.0).contains(&self.scoring.threshold) {
            anyhow::bail!("scoring.threshold must lie in [0, 1]");
        }
        if self.pipeline.chunk_size == 0 || self.pipeline.workers == 0 {
            anyhow::bail!("pipeline.chunk_size and pipeline.workers must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig {
                models_dir: "models".to_string(),
                preprocessor: default_preprocessor(),
                best_model: default_best_model(),
                registry: default_registry(),
                onnx_threads: default_onnx_threads(),
            },
            scoring: ScoringConfig::default(),
            velocity: VelocityConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
