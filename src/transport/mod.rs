//! Sample delivery.
//!
//! Uploads are best-effort: a sink reports success or failure as a bool and
//! never returns an error to the pipeline. A failed sample is logged and
//! dropped; there is no retry and no local queue.

mod http;

use anyhow::Result;

pub use http::HttpUploader;

use crate::aggregate::Sample;
use crate::config::{StatisticKey, UploadSettings};

/// Destination for aggregated samples.
pub trait SampleSink: Send + Sync {
    /// Sink identifier.
    fn name(&self) -> &'static str;

    /// Deliver one sample. `true` means the remote accepted it.
    fn send(&self, sample: &Sample) -> bool;
}

/// Sink used when no endpoint is configured: logs each record.
pub struct LogSink {
    key: StatisticKey,
}

impl LogSink {
    pub fn new(key: StatisticKey) -> Self {
        Self { key }
    }
}

impl SampleSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send(&self, sample: &Sample) -> bool {
        log::info!("sample (not uploaded): {}", sample.to_record(self.key));
        true
    }
}

/// HTTP uploader when an endpoint is configured, otherwise a log-only sink.
pub fn sink_from_settings(settings: &UploadSettings) -> Result<Box<dyn SampleSink>> {
    match settings.endpoint {
        Some(_) => Ok(Box::new(HttpUploader::new(settings)?)),
        None => {
            log::warn!("no upload endpoint configured; samples will only be logged");
            Ok(Box::new(LogSink::new(settings.statistic_key)))
        }
    }
}
