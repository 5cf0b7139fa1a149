//! Test Upload Generator
//!
//! Writes a synthetic batch upload (60% normal, 40% suspicious rows) and,
//! optionally, a JSON-lines click stream containing bursts for ingestion.

use chrono::{Duration, Utc};
use clap::Parser;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "generate-test-csv")]
#[command(about = "Generate synthetic click data for batch scoring and ingestion")]
struct Args {
    /// Number of upload rows
    #[arg(default_value_t = 100)]
    count: usize,

    /// Upload destination
    #[arg(default_value = "test_clicks.csv")]
    output: PathBuf,

    /// Also write this many live clicks as JSON lines
    #[arg(long)]
    clicks: Option<usize>,

    /// Click stream destination
    #[arg(long, default_value = "test_clicks.jsonl")]
    clicks_output: PathBuf,
}

/// Row in the batch upload layout
#[derive(Debug, Serialize)]
struct UploadRow {
    timestamp: String,
    device_type: String,
    browser: String,
    operating_system: String,
    ad_position: String,
    device_ip_reputation: String,
    scroll_depth: u32,
    mouse_movement: u32,
    keystrokes_detected: u32,
    click_duration: f64,
    bot_likelihood_score: f64,
    #[serde(rename = "VPN_usage")]
    vpn_usage: u8,
    proxy_usage: u8,
}

/// Live click payload accepted by `click-fraud ingest`
#[derive(Debug, Serialize)]
struct LiveClick {
    timestamp: String,
    device_type: String,
    browser: String,
    operating_system: String,
    ad_position: String,
    scroll_depth: u32,
    mouse_movement: u32,
    click_duration: f64,
    ad_id: String,
}

const AD_POSITIONS: [&str; 4] = ["top", "middle", "bottom", "sidebar"];

struct ClickGenerator {
    rng: rand::rngs::ThreadRng,
}

impl ClickGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
        }
    }

    /// Some time within the last 24 hours
    fn recent_timestamp(&mut self) -> String {
        let minutes = self.rng.gen_range(1..=1440);
        (Utc::now() - Duration::minutes(minutes))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string()
    }

    fn generate_normal(&mut self) -> UploadRow {
        UploadRow {
            timestamp: self.recent_timestamp(),
            device_type: self.random_choice(&["Desktop", "Mobile", "Tablet"]).to_string(),
            browser: self.random_choice(&["Chrome", "Firefox", "Safari", "Edge"]).to_string(),
            operating_system: self
                .random_choice(&["Windows", "macOS", "iOS", "Android"])
                .to_string(),
            ad_position: self.random_choice(&AD_POSITIONS).to_string(),
            device_ip_reputation: "Good".to_string(),
            scroll_depth: self.rng.gen_range(50..=100),
            mouse_movement: self.rng.gen_range(200..=600),
            keystrokes_detected: self.rng.gen_range(50..=200),
            click_duration: round2(self.rng.gen_range(0.8..2.0)),
            bot_likelihood_score: round2(self.rng.gen_range(0.0..0.3)),
            vpn_usage: 0,
            proxy_usage: 0,
        }
    }

    fn generate_suspicious(&mut self) -> UploadRow {
        let device_type = if self.rng.gen_bool(0.7) {
            self.random_choice(&["Mobile", "Bot"])
        } else {
            self.random_choice(&["Desktop", "Mobile", "Tablet", "Bot"])
        };
        let browser = if self.rng.gen_bool(0.7) {
            self.random_choice(&["Unknown", "Chrome"])
        } else {
            self.random_choice(&["Chrome", "Firefox", "Safari", "Edge", "Opera", "Unknown"])
        };

        UploadRow {
            timestamp: self.recent_timestamp(),
            device_type: device_type.to_string(),
            browser: browser.to_string(),
            operating_system: self.random_choice(&["Android", "Unknown", "Windows"]).to_string(),
            ad_position: self.random_choice(&["top", "bottom"]).to_string(),
            device_ip_reputation: self.random_choice(&["Suspicious", "Bad"]).to_string(),
            scroll_depth: self.rng.gen_range(0..=30),
            mouse_movement: self.rng.gen_range(0..=100),
            keystrokes_detected: self.rng.gen_range(0..=20),
            click_duration: round2(self.rng.gen_range(0.1..0.5)),
            bot_likelihood_score: round2(self.rng.gen_range(0.6..1.0)),
            vpn_usage: u8::from(self.rng.gen_bool(0.7)),
            proxy_usage: u8::from(self.rng.gen_bool(0.6)),
        }
    }

    /// Clicks a few seconds apart, with an occasional sub-second burst
    fn generate_clicks(&mut self, count: usize) -> Vec<LiveClick> {
        let mut at = Utc::now() - Duration::seconds(count as i64 * 3);
        let mut clicks = Vec::with_capacity(count);
        while clicks.len() < count {
            let burst = self.rng.gen_bool(0.1);
            let step = if burst {
                Duration::milliseconds(self.rng.gen_range(100..400))
            } else {
                Duration::milliseconds(self.rng.gen_range(2500..6000))
            };
            at += step;
            clicks.push(LiveClick {
                timestamp: at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                device_type: self.random_choice(&["Desktop", "Mobile", "Tablet"]).to_string(),
                browser: self.random_choice(&["Chrome", "Firefox", "Safari"]).to_string(),
                operating_system: self.random_choice(&["Windows", "Android", "iOS"]).to_string(),
                ad_position: self.random_choice(&AD_POSITIONS).to_string(),
                scroll_depth: self.rng.gen_range(0..=100),
                mouse_movement: self.rng.gen_range(0..=600),
                click_duration: round2(self.rng.gen_range(0.1..2.0)),
                ad_id: format!("ad-{}", self.rng.gen_range(1..=5)),
            });
        }
        clicks
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("generate_test_csv=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut generator = ClickGenerator::new();

    let normal = args.count * 6 / 10;
    let mut rows: Vec<UploadRow> = (0..normal).map(|_| generator.generate_normal()).collect();
    rows.extend((normal..args.count).map(|_| generator.generate_suspicious()));
    rows.shuffle(&mut rand::thread_rng());

    let mut writer = csv::Writer::from_path(&args.output)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!(
        path = %args.output.display(),
        rows = rows.len(),
        normal,
        suspicious = rows.len() - normal,
        "Upload written"
    );

    if let Some(count) = args.clicks {
        let mut out = BufWriter::new(File::create(&args.clicks_output)?);
        for click in generator.generate_clicks(count) {
            serde_json::to_writer(&mut out, &click)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        info!(path = %args.clicks_output.display(), clicks = count, "Click stream written");
    }

    Ok(())
}
