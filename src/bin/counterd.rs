//! counterd - occupancy counter daemon
//!
//! This daemon:
//! 1. Loads configuration (file, environment, flags)
//! 2. Loads the detection model and labels, claims the GPIO pins
//! 3. Opens the camera on the capture thread
//! 4. Counts people per frame while the switch is RUNNING
//! 5. Uploads one sample per full aggregation window
//! 6. Shuts down cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use occupancy_counter::{ConfigOverrides, CounterConfig, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Count people in camera frames and report them")]
struct Args {
    /// Detection model (`stub://` runs without one).
    #[arg(long, env = "COUNTER_MODEL")]
    model: Option<PathBuf>,

    /// Label file mapping class ids to names.
    #[arg(long, env = "COUNTER_LABELS")]
    labels: Option<PathBuf>,

    /// Minimum confidence for a person detection.
    #[arg(long, env = "COUNTER_THRESHOLD")]
    threshold: Option<f32>,

    /// Stream continuously and write an annotated preview.
    #[arg(long)]
    watch: bool,

    /// Per-frame counts per uploaded sample.
    #[arg(long, env = "COUNTER_COLLECTION_LIMIT")]
    collection_limit: Option<usize>,

    /// Camera device (`stub://` for synthetic frames).
    #[arg(long, env = "COUNTER_CAMERA_DEVICE")]
    device: Option<String>,

    /// Pause between single-shot captures.
    #[arg(long, value_name = "MS", env = "COUNTER_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Upload endpoint URL.
    #[arg(long, env = "COUNTER_POST_DATA_ROUTE")]
    endpoint: Option<String>,

    /// Start counting without waiting for a button press.
    #[arg(long)]
    start_running: bool,
}

impl Args {
    fn overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            model_path: self.model,
            labels_path: self.labels,
            threshold: self.threshold,
            watch: self.watch.then_some(true),
            collection_limit: self.collection_limit,
            trigger: None,
            device: self.device,
            capture_interval: self.interval_ms.map(Duration::from_millis),
            endpoint: self.endpoint,
            start_running: self.start_running.then_some(true),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = CounterConfig::load()?;
    config.apply_overrides(args.overrides())?;

    let pipeline = Pipeline::from_config(&config)?;
    if config.start_running {
        pipeline.switch().press()?;
    } else if config.gpio.button_pin.is_none() {
        log::warn!("no button configured and start_running is off; counting will not start");
    }

    let handle = pipeline.spawn()?;
    log::info!("counterd running (version {})", env!("CARGO_PKG_VERSION"));

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("counterd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping pipeline...");
    let stats = handle.stats();
    handle.stop()?;
    log::info!(
        "counterd stopped: frames={} samples={} uploaded={} dropped={}",
        stats.frames,
        stats.samples,
        stats.uploads_ok,
        stats.uploads_failed
    );

    Ok(())
}
