use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Inference engine trait.
///
/// An engine is the opaque model runtime: given a frame of its expected input
/// size it returns every raw detection the model produced, unfiltered.
/// Class and score filtering belong to `Detector`, not to engines.
///
/// Engines hold only immutable model state after construction.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Input (width, height) the loaded model expects.
    fn input_size(&self) -> (u32, u32);

    /// Run inference on a frame already scaled to `input_size`.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
