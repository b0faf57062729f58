//! Camera frame source.
//!
//! `CameraSource` captures frames from a local V4L2 device (the Raspberry Pi
//! camera exposes one at `/dev/video0`) or, for `stub://` paths, generates
//! synthetic frames so the pipeline runs without hardware.
//!
//! The camera source is responsible for:
//! - Opening the device once and negotiating the capture resolution
//! - Normalizing captured buffers to RGB24
//! - Producing `Frame` instances, one per `next_frame` call
//!
//! The device is released when the source is dropped.

#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::config::CameraSettings;
use crate::frame::Frame;
#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};

/// Camera frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraSettings) -> Result<Self> {
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: CameraBackend::Device(DeviceCamera::new(config)),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                Err(anyhow::anyhow!(
                    "camera device {} requires the ingest-v4l2 feature",
                    config.device
                ))
            }
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    /// Capture the next frame, blocking until the device has one ready.
    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn frames_captured(&self) -> u64 {
        self.stats().frames_captured
    }

    fn describe(&self) -> String {
        self.stats().device
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and hardware-free runs
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraSettings,
    frame_count: u64,
    /// Changes every 25 frames so stub detections vary over time.
    scene_state: u8,
    connected: bool,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    fn new(config: CameraSettings) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            connected: false,
            last_frame_at: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow::anyhow!("synthetic camera not connected; call connect() first"));
        }
        // Pace like a real device would.
        let interval = frame_interval(self.config.target_fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.generate_synthetic_pixels();
        Frame::new(pixels, self.config.width, self.config.height, self.frame_count)
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 25 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.scene_state as u64 * 37) % 256) as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

/// Buffers queued on the device stream.
#[cfg(feature = "ingest-v4l2")]
const STREAM_BUFFERS: u32 = 4;

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    config: CameraSettings,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
    format: PixelFormat,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn new(config: CameraSettings) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
            format: PixelFormat::Rgb24,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow::anyhow!(
                "camera {} delivers unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        // After a long pause the queued buffers hold old images; single-shot
        // captures must reflect the scene now, so discard them first.
        let stale = self
            .last_frame_at
            .is_some_and(|last| last.elapsed() > Duration::from_secs(1));

        let state = self.state.as_mut().context("camera device not connected")?;
        if stale {
            for _ in 0..STREAM_BUFFERS {
                state
                    .with_mut(|fields| fields.stream.next().map(|_| ()))
                    .context("discard stale v4l2 buffer")?;
            }
        }

        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let pixels = state
            .with_mut(|fields| {
                fields
                    .stream
                    .next()
                    .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
            })
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;
        let rgb = normalize_to_rgb(&pixels, width, height, format)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Frame::new(rgb, width, height, self.frame_count)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        self.state.is_some()
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
