use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// What a backend produces for each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Zero or more labelled regions with confidences.
    ObjectDetection,
    /// One whole-frame probability.
    Classification,
}

/// Detector backend trait.
///
/// Backends wrap one model. They apply no incident policy: a backend reports
/// what it saw and how confident it is, and the incident machines decide what
/// counts as an incident.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn capability(&self) -> DetectionCapability;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
