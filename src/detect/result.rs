/// Bounding box in relative coordinates (0..1), in the model's
/// `ymin, xmin, ymax, xmax` order.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl BoundingBox {
    /// Same box with every coordinate clamped into 0..1.
    pub fn clamped(&self) -> Self {
        Self {
            ymin: self.ymin.clamp(0.0, 1.0),
            xmin: self.xmin.clamp(0.0, 1.0),
            ymax: self.ymax.clamp(0.0, 1.0),
            xmax: self.xmax.clamp(0.0, 1.0),
        }
    }
}

/// One object instance reported by an inference engine.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    /// Confidence 0..1.
    pub score: f32,
}

/// Detections for one frame that passed the class and threshold filter.
#[derive(Clone, Debug, Default)]
pub struct FrameResult {
    pub detections: Vec<Detection>,
}

impl FrameResult {
    /// Person count for the frame.
    pub fn count(&self) -> u32 {
        self.detections.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
