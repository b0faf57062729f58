//! upload_check - post one all-zero sample to the configured endpoint.
//!
//! Verifies endpoint, credentials and timeout without a camera or model.
//! Exits non-zero when the endpoint does not accept the sample.

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;

use occupancy_counter::transport::HttpUploader;
use occupancy_counter::{ConfigOverrides, CounterConfig, Sample, SampleSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Send a test sample to the upload endpoint")]
struct Args {
    /// Upload endpoint URL.
    #[arg(long, env = "COUNTER_POST_DATA_ROUTE")]
    endpoint: Option<String>,

    /// Counts in the test sample (defaults to the configured window size).
    #[arg(long)]
    counts: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = CounterConfig::load()?;
    config.apply_overrides(ConfigOverrides {
        endpoint: args.endpoint,
        ..ConfigOverrides::default()
    })?;
    if config.upload.endpoint.is_none() {
        return Err(anyhow!(
            "no endpoint: set COUNTER_POST_DATA_ROUTE or pass --endpoint"
        ));
    }

    let uploader = HttpUploader::new(&config.upload)?;
    let size = args
        .counts
        .unwrap_or(config.aggregation.collection_limit)
        .max(1);
    let sample = Sample {
        counts: vec![0; size],
        statistic: 0,
        timestamp: Local::now(),
    };
    println!("{}", sample.to_record(config.upload.statistic_key));

    if uploader.send(&sample) {
        println!("sample accepted");
        Ok(())
    } else {
        Err(anyhow!("sample rejected; see log for details"))
    }
}
