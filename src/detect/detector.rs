use anyhow::{anyhow, Result};

use crate::detect::engine::InferenceEngine;
use crate::detect::labels::Labels;
use crate::detect::result::{Detection, FrameResult};
use crate::frame::Frame;

/// Person detector: an inference engine plus the label map and confidence threshold.
///
/// Everything is fixed at construction; `detect` has no side effects beyond the
/// inference call itself.
pub struct Detector {
    engine: Box<dyn InferenceEngine>,
    labels: Labels,
    person_class: u32,
    threshold: f32,
}

impl Detector {
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        labels: Labels,
        person_class: u32,
        threshold: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("detection threshold {} outside 0..=1", threshold));
        }
        log::info!(
            "detector: engine={} labels={} person_class={} ({}) threshold={:.2}",
            engine.name(),
            labels.len(),
            person_class,
            labels.get(person_class).unwrap_or("unlabelled"),
            threshold
        );
        Ok(Self {
            engine,
            labels,
            person_class,
            threshold,
        })
    }

    /// Model input (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        self.engine.input_size()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn label(&self, class_id: u32) -> Option<&str> {
        self.labels.get(class_id)
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.engine.warm_up()
    }

    /// Run inference and keep only persons at or above the threshold.
    ///
    /// Frames not already at the model input size are scaled first.
    /// An empty result is a normal outcome.
    pub fn detect(&mut self, frame: &Frame) -> Result<FrameResult> {
        let (width, height) = self.engine.input_size();
        let raw = if frame.width == width && frame.height == height {
            self.engine.infer(frame)?
        } else {
            let scaled = frame.resized(width, height)?;
            self.engine.infer(&scaled)?
        };
        Ok(self.filter(raw))
    }

    /// Apply the person-class and score filter to raw engine output.
    pub fn filter(&self, raw: Vec<Detection>) -> FrameResult {
        let detections = raw
            .into_iter()
            .filter(|det| det.class_id == self.person_class && det.score >= self.threshold)
            .collect();
        FrameResult { detections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    struct FixedEngine {
        output: Vec<Detection>,
    }

    impl InferenceEngine for FixedEngine {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            assert_eq!((frame.width, frame.height), (8, 8));
            Ok(self.output.clone())
        }
    }

    fn det(class_id: u32, score: f32) -> Detection {
        Detection {
            bbox: BoundingBox::default(),
            class_id,
            score,
        }
    }

    fn detector(output: Vec<Detection>) -> Detector {
        let labels = Labels::parse("0 person\n1 bicycle\n2 car\n");
        Detector::new(Box::new(FixedEngine { output }), labels, 0, 0.6).unwrap()
    }

    #[test]
    fn keeps_only_persons_at_or_above_threshold() {
        let mut detector = detector(vec![
            det(0, 0.9),
            det(2, 0.95),
            det(0, 0.59),
            det(0, 0.6),
            det(1, 0.7),
        ]);
        let frame = Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, 1).unwrap();
        let result = detector.detect(&frame).unwrap();
        assert_eq!(result.count(), 2);
        assert!(result.detections.iter().all(|d| d.class_id == 0));
        assert_eq!(result.detections[1].score, 0.6);
    }

    #[test]
    fn no_qualifying_detections_is_empty_not_error() {
        let mut detector = detector(vec![det(2, 0.99), det(0, 0.1)]);
        let frame = Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, 1).unwrap();
        let result = detector.detect(&frame).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.count(), 0);
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let engine = Box::new(FixedEngine { output: vec![] });
        assert!(Detector::new(engine, Labels::default(), 0, 1.5).is_err());
    }

    #[test]
    fn person_class_ignores_label_file_layout() {
        // SSD label maps start with a `???` placeholder, shifting `person` to line 1.
        let labels = Labels::parse("???\nperson\nbicycle\ncar\n");
        let engine = Box::new(FixedEngine {
            output: vec![det(0, 0.9), det(1, 0.9), det(1, 0.8)],
        });
        let mut detector = Detector::new(engine, labels, 0, 0.6).unwrap();
        let frame = Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, 1).unwrap();
        let result = detector.detect(&frame).unwrap();
        assert_eq!(result.count(), 1);
        assert_eq!(result.detections[0].class_id, 0);
    }

    #[test]
    fn configured_person_class_is_used() {
        let engine = Box::new(FixedEngine {
            output: vec![det(0, 0.9), det(1, 0.9), det(1, 0.8)],
        });
        let mut detector = Detector::new(engine, Labels::default(), 1, 0.6).unwrap();
        let frame = Frame::new(vec![0u8; 8 * 8 * 3], 8, 8, 1).unwrap();
        assert_eq!(detector.detect(&frame).unwrap().count(), 2);
    }
}
