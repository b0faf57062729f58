//! Frame ingestion sources.
//!
//! This module provides the sources the capture loop pulls frames from:
//! - `CameraSource`: local V4L2 camera (feature: ingest-v4l2) or `stub://` synthetic frames
//! - `ContinuousCapture`: streams any source from a dedicated thread through a bounded queue
//!
//! Two cadences are supported:
//! - single-shot: the capture loop calls `next_frame` and controls the delay between captures
//! - continuous: the device delivers frames as fast as it can and the loop pulls from the queue
//!
//! Every `next_frame` call blocks until a frame is ready. Sources are opened
//! through a `SourceFactory` so the thread that captures is also the thread
//! that owns the device handle.

mod camera;
mod continuous;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;

use anyhow::{Context, Result};

pub use camera::{CameraSource, CameraStats};
pub use continuous::ContinuousCapture;

use crate::config::CameraSettings;
use crate::frame::Frame;

/// A producer of frames.
pub trait FrameSource {
    /// Open the underlying device. Failure here is fatal to the pipeline.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    ///
    /// Errors are per-frame; callers may retry on the next cycle.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    fn frames_captured(&self) -> u64;

    /// Human readable source name for logs.
    fn describe(&self) -> String;
}

/// Capture cadence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    SingleShot,
    Continuous,
}

/// Opens and connects a source on the thread that will own it.
pub type SourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// Factory for the configured camera: open, connect, then let the sensor settle.
pub fn camera_factory(settings: CameraSettings) -> SourceFactory {
    Box::new(move || {
        let warm_up = settings.warm_up;
        let device = settings.device.clone();
        let mut source = CameraSource::new(settings)?;
        source
            .connect()
            .with_context(|| format!("camera {} unavailable", device))?;
        if !warm_up.is_zero() {
            log::info!("CameraSource: warming up for {:?}", warm_up);
            std::thread::sleep(warm_up);
        }
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}
