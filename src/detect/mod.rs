mod backends;
mod detector;
mod engine;
mod labels;
mod result;

pub use backends::StubEngine;
#[cfg(feature = "backend-tract")]
pub use backends::TractEngine;
pub use detector::Detector;
pub use engine::InferenceEngine;
pub use labels::Labels;
pub use result::{BoundingBox, Detection, FrameResult};

use anyhow::Result;

use crate::config::DetectorSettings;

const STUB_SCHEME: &str = "stub://";

/// Build the detector named by the settings.
///
/// A `stub://` model selects the stub engine; it tolerates a missing label
/// file. Any other model path needs the
/// `backend-tract` feature, and both the model and the label file must load.
pub fn detector_from_settings(settings: &DetectorSettings) -> Result<Detector> {
    let model = settings.model_path.to_string_lossy();
    let (width, height) = (settings.input_width, settings.input_height);

    if model.starts_with(STUB_SCHEME) {
        let labels = if settings.labels_path.exists() {
            Labels::load(&settings.labels_path)?
        } else {
            log::warn!(
                "label file {} not found; stub engine runs unlabelled",
                settings.labels_path.display()
            );
            Labels::parse("person")
        };
        return Detector::new(
            Box::new(StubEngine::new(width, height)),
            labels,
            settings.person_class,
            settings.threshold,
        );
    }

    let labels = Labels::load(&settings.labels_path)?;
    let engine = model_engine(settings, width, height)?;
    Detector::new(engine, labels, settings.person_class, settings.threshold)
}

#[cfg(feature = "backend-tract")]
fn model_engine(
    settings: &DetectorSettings,
    width: u32,
    height: u32,
) -> Result<Box<dyn InferenceEngine>> {
    Ok(Box::new(TractEngine::new(&settings.model_path, width, height)?))
}

#[cfg(not(feature = "backend-tract"))]
fn model_engine(
    settings: &DetectorSettings,
    _width: u32,
    _height: u32,
) -> Result<Box<dyn InferenceEngine>> {
    Err(anyhow::anyhow!(
        "model {} requires the backend-tract feature (use stub:// to run without a model)",
        settings.model_path.display()
    ))
}
