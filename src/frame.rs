//! Decoded camera frames.
//!
//! - `Frame`: tightly packed RGB24 pixels plus capture metadata.
//! - `annotate`: draws detection boxes onto a frame for the watch-mode preview.
//!
//! Frames are produced by the ingestion layer, resized to the model input
//! before inference, and dropped at the end of the capture cycle that
//! produced them. Nothing here persists frames except the preview writer.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::detect::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// One decoded RGB24 frame.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source capture sequence number, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap RGB24 pixels. Fails when the buffer length does not match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Decode an encoded image (JPEG) into an RGB frame.
    pub fn decode(bytes: &[u8], sequence: u64) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode frame")?;
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(rgb.into_raw(), width, height, sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Returns a copy scaled to `width`x`height`, or a plain copy when already that size.
    pub fn resized(&self, width: u32, height: u32) -> Result<Frame> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        let image = self.to_rgb_image()?;
        let scaled = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Ok(Frame {
            pixels: scaled.into_raw(),
            width,
            height,
            sequence: self.sequence,
            captured_at: self.captured_at,
        })
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", self.width, self.height))
    }
}

/// Draw each detection's box, scaled from relative coordinates to the frame size.
pub fn annotate(frame: &Frame, detections: &[Detection]) -> Result<RgbImage> {
    let mut image = frame.to_rgb_image()?;
    let (w, h) = (frame.width as f32, frame.height as f32);
    for det in detections {
        let b = det.bbox.clamped();
        let xmin = (b.xmin * w) as i32;
        let ymin = (b.ymin * h) as i32;
        let xmax = (b.xmax * w) as i32;
        let ymax = (b.ymax * h) as i32;
        // imageproc rejects zero-sized rects
        let rect_w = (xmax - xmin).max(1) as u32;
        let rect_h = (ymax - ymin).max(1) as u32;
        draw_hollow_rect_mut(&mut image, Rect::at(xmin, ymin).of_size(rect_w, rect_h), BOX_COLOR);
    }
    Ok(image)
}

/// Write an annotated preview frame as JPEG, replacing the previous one.
pub fn write_preview(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save_with_format(path, ImageFormat::Jpeg)
        .with_context(|| format!("write preview {}", path.display()))
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
