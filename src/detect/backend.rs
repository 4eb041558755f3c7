use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// Implementations are synchronous: one call maps one RGB frame to the objects
/// found in it. An empty list means nothing was found. Errors are allowed; the
/// pipeline treats a failed call as zero detections and counts it.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a packed RGB8 frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
