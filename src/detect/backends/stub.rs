use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::engine::InferenceEngine;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const MAX_OBJECTS: u8 = 6;
const NON_PERSON_CLASS: u32 = 2;

/// Stub engine for running without a model. Derives detections from a pixel hash,
/// so identical frames always yield identical detections.
pub struct StubEngine {
    width: u32,
    height: u32,
}

impl StubEngine {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let objects = (digest[0] % MAX_OBJECTS) as usize;

        let detections = (0..objects)
            .map(|i| {
                let seed = &digest[1 + i * 5..6 + i * 5];
                let ymin = seed[0] as f32 / 512.0;
                let xmin = seed[1] as f32 / 512.0;
                Detection {
                    bbox: BoundingBox {
                        ymin,
                        xmin,
                        ymax: ymin + 0.25,
                        xmax: xmin + 0.2,
                    },
                    // roughly one in four objects is not a person
                    class_id: if seed[2] % 4 == 0 { NON_PERSON_CLASS } else { 0 },
                    score: 0.3 + (seed[3] as f32 / 255.0) * 0.7,
                }
            })
            .collect();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_engine_is_deterministic_per_frame() {
        let mut engine = StubEngine::new(4, 4);
        let frame = Frame::new(vec![7u8; 4 * 4 * 3], 4, 4, 1).unwrap();
        let a = engine.infer(&frame).unwrap();
        let b = engine.infer(&frame).unwrap();
        assert_eq!(a, b);
        assert!(a.len() < MAX_OBJECTS as usize);
        assert!(a.iter().all(|d| (0.0..=1.0).contains(&d.score)));
    }
}
