//! Click Fraud Pipeline - Command Line Entry Point
//!
//! Scores single events and CSV uploads against the trained models, and
//! ingests live clicks through the velocity detector.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use click_fraud_pipeline::{
    batch::{export_combined, BatchReader},
    config::{AppConfig, LoggingConfig},
    error::ScoringError,
    event_log::EventLog,
    ingest::ClickIngestor,
    metrics::{MetricsReporter, PipelineMetrics},
    models::{ModelRegistry, ScoringEngine},
    prediction_log::PredictionLog,
    types::{ClickEvent, RawEvent, TimestampPolicy},
};
use futures::{StreamExt, TryStreamExt};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "click-fraud")]
#[command(about = "Ad-click fraud scoring and click-velocity detection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; built-in defaults are used when it is absent
    #[arg(short, long, default_value = "config/config.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one event (inline JSON or a path to a JSON file)
    Predict { input: String },

    /// Score a CSV upload against every registry model
    Batch {
        input: PathBuf,

        /// Write the combined table (original columns + per-model predictions)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print per-model counts only, without the per-row arrays
        #[arg(long)]
        summary: bool,
    },

    /// Ingest clicks from a JSON-lines file, or stdin with "-"
    Ingest {
        input: String,

        /// Clicks processed concurrently
        #[arg(long, default_value_t = 1)]
        workers: usize,

        /// Seconds between metrics summaries (0 disables)
        #[arg(long, default_value_t = 0)]
        report_interval: u64,
    },

    /// List logged clicks
    Clicks {
        /// Only the most recent N clicks
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show available models and their training metrics
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging)?;

    if !cli.config.exists() {
        warn!(path = %cli.config.display(), "Configuration file not found, using defaults");
    }
    info!(models_dir = %config.models.models_dir, "Configuration loaded successfully");

    let metrics = Arc::new(PipelineMetrics::new());

    match cli.command {
        Commands::Predict { input } => {
            let engine = build_engine(&config, Arc::clone(&metrics))?;
            run_predict(&engine, &input)?;
        }
        Commands::Batch {
            input,
            out,
            summary,
        } => {
            let engine = Arc::new(build_engine(&config, Arc::clone(&metrics))?);
            run_batch(engine, &config, &input, out.as_deref(), summary).await?;
        }
        Commands::Ingest {
            input,
            workers,
            report_interval,
        } => {
            let ingestor = Arc::new(ClickIngestor::new(&config.velocity, Arc::clone(&metrics))?);
            if report_interval > 0 {
                let reporter = MetricsReporter::new(Arc::clone(&metrics), report_interval);
                tokio::spawn(reporter.start());
            }
            run_ingest(ingestor, &input, workers).await?;
        }
        Commands::Clicks { limit } => {
            run_clicks(&config, limit)?;
            return Ok(());
        }
        Commands::Models => {
            let engine = build_engine(&config, Arc::clone(&metrics))?;
            run_models(engine.registry())?;
            return Ok(());
        }
    }

    metrics.print_summary();
    Ok(())
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load_from_path(path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Logs go to stderr; stdout carries results
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("click_fraud_pipeline={}", logging.level).parse()?)
        .add_directive(format!("click_fraud={}", logging.level).parse()?);

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn build_engine(config: &AppConfig, metrics: Arc<PipelineMetrics>) -> Result<ScoringEngine> {
    let registry = Arc::new(ModelRegistry::new(&config.models));
    let mut engine = ScoringEngine::new(registry, &config.scoring, metrics);
    if let Some(path) = &config.logging.prediction_log {
        engine = engine.with_prediction_log(PredictionLog::open(path)?);
    }
    Ok(engine)
}

fn run_predict(engine: &ScoringEngine, input: &str) -> Result<()> {
    let raw = if Path::new(input).is_file() {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read {input}"))?
    } else {
        input.to_string()
    };
    let value: serde_json::Value =
        serde_json::from_str(&raw).context("Prediction input is not valid JSON")?;

    let event = RawEvent::from_json(&value, TimestampPolicy::DefaultNow)?;
    let verdict = engine.predict(&event)?;

    info!(
        request_id = %verdict.request_id,
        model = %verdict.model,
        fraud_probability = verdict.prediction.fraud_probability,
        is_fraud = verdict.prediction.is_fraud,
        "Prediction complete"
    );
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

async fn run_batch(
    engine: Arc<ScoringEngine>,
    config: &AppConfig,
    input: &Path,
    out: Option<&Path>,
    summary: bool,
) -> Result<()> {
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let mut reader = BatchReader::new(BufReader::new(file), config.pipeline.chunk_size)?;

    info!(
        input = %input.display(),
        chunk_size = config.pipeline.chunk_size,
        workers = config.pipeline.workers,
        "Scoring upload"
    );

    // At most `workers` chunks are held in memory at once
    let chunks = futures::stream::iter(reader.by_ref())
        .map(|chunk| {
            let engine = Arc::clone(&engine);
            async move {
                let chunk = chunk?;
                let scores = tokio::task::spawn_blocking(move || engine.score_chunk(&chunk)).await??;
                Ok::<_, anyhow::Error>(scores)
            }
        })
        .buffered(config.pipeline.workers)
        .try_collect::<Vec<_>>()
        .await?;

    let report = engine.finish_batch(chunks, reader.into_dropped())?;

    if summary {
        let summary = serde_json::json!({
            "batch_id": report.batch_id,
            "total_records": report.total_records,
            "dropped_rows": report.dropped_rows,
            "selected_model": report.selected_model().map(|(name, _)| name),
            "models": report.summaries(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if let Some(out) = out {
        let upload = BufReader::new(File::open(input)?);
        let output = File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;
        match export_combined(upload, &report, output)? {
            Some(rows) => info!(path = %out.display(), rows, "Combined results exported"),
            None => warn!("No model produced results, nothing exported"),
        }
    }
    Ok(())
}

async fn run_ingest(ingestor: Arc<ClickIngestor>, input: &str, workers: usize) -> Result<()> {
    let source: Box<dyn AsyncRead + Unpin + Send> = if input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(input)
                .await
                .with_context(|| format!("Failed to open {input}"))?,
        )
    };
    let mut lines = tokio::io::BufReader::new(source).lines();

    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    info!(workers, "Ingesting clicks");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let ingestor = Arc::clone(&ingestor);
        let processed_count = Arc::clone(&processed_count);

        tokio::task::spawn_blocking(move || {
            let click = serde_json::from_str::<serde_json::Value>(&line)
                .map_err(ScoringError::from)
                .and_then(|value| ClickEvent::from_json(&value));

            match click.and_then(|click| ingestor.ingest(&click)) {
                Ok(verdict) => match serde_json::to_string(&verdict) {
                    Ok(json) => println!("{json}"),
                    Err(e) => warn!(error = %e, "Failed to serialize click verdict"),
                },
                Err(e) => warn!(error = %e, "Failed to ingest click"),
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                info!(processed = count, "Ingestion milestone");
            }
            drop(permit);
        });
    }

    // wait for in-flight clicks
    let _all = semaphore.acquire_many(workers as u32).await?;
    info!(processed = processed_count.load(Ordering::Relaxed), "Ingestion complete");
    Ok(())
}

fn run_clicks(config: &AppConfig, limit: Option<usize>) -> Result<()> {
    let path = Path::new(&config.velocity.log_path);
    if !path.exists() {
        anyhow::bail!("Click log not found at {}", path.display());
    }
    let entries = EventLog::read_all(path)?;
    let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
    println!("{}", serde_json::to_string_pretty(&entries[skip..])?);
    Ok(())
}

fn run_models(registry: &ModelRegistry) -> Result<()> {
    let available = registry.available_models();
    let models: Vec<serde_json::Value> = registry
        .entries()
        .iter()
        .map(|entry| {
            serde_json::json!({
                "name": entry.name,
                "path": registry.entry_path(entry),
                "available": available.contains(&entry.name),
            })
        })
        .collect();

    let best_model = match registry.best_model() {
        Ok(best) => Some(best.name),
        Err(e) => {
            warn!(error = %e, "No single-prediction model");
            None
        }
    };

    let training_report = match registry.training_report() {
        Ok(report) => {
            if !report.is_complete() {
                warn!(
                    missing = ?report.missing_models,
                    incomplete = report.incomplete.len(),
                    "Training report is incomplete"
                );
            }
            Some(report)
        }
        Err(ScoringError::ArtifactNotFound { .. }) => None,
        Err(e) => return Err(e.into()),
    };

    let output = serde_json::json!({
        "models": models,
        "best_model": best_model,
        "training_report": training_report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
