#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::engine::InferenceEngine;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Tract-based engine for SSD-style ONNX detection models.
///
/// The model takes a `1 x H x W x 3` u8 tensor and produces four outputs in
/// order: boxes `[1, N, 4]` (ymin, xmin, ymax, xmax), classes `[1, N]`,
/// scores `[1, N]` and the valid detection count `[1]`.
pub struct TractEngine {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
}

impl TractEngine {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width != self.width || frame.height != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }
        let pixels = frame.pixels();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, self.height as usize, width, 3),
            |(_, y, x, channel)| pixels[(y * width + x) * 3 + channel],
        );
        Ok(input.into_tensor())
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        if outputs.len() < 4 {
            return Err(anyhow!(
                "expected 4 detection outputs, model produced {}",
                outputs.len()
            ));
        }

        let boxes = outputs[0].cast_to::<f32>().context("boxes output")?;
        let classes = outputs[1].cast_to::<f32>().context("classes output")?;
        let scores = outputs[2].cast_to::<f32>().context("scores output")?;
        let count = outputs[3].cast_to::<f32>().context("count output")?;

        let boxes = boxes.as_slice::<f32>()?;
        let classes = classes.as_slice::<f32>()?;
        let scores = scores.as_slice::<f32>()?;
        let reported = count
            .as_slice::<f32>()?
            .first()
            .copied()
            .unwrap_or(0.0)
            .max(0.0) as usize;
        let available = scores.len().min(classes.len()).min(boxes.len() / 4);

        let detections = (0..reported.min(available))
            .map(|i| Detection {
                bbox: BoundingBox {
                    ymin: boxes[i * 4],
                    xmin: boxes[i * 4 + 1],
                    ymax: boxes[i * 4 + 2],
                    xmax: boxes[i * 4 + 3],
                },
                class_id: classes[i].max(0.0) as u32,
                score: scores[i],
            })
            .collect();
        Ok(detections)
    }
}
