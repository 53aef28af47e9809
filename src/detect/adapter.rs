use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::IncidentClass;

/// Uniform detection front for all incident classes.
///
/// Each class is served by at most one backend. A missing backend, a backend
/// error or a malformed result all collapse to "no detections this frame": a
/// single bad frame must never stop the frame loop.
pub struct DetectorAdapter {
    backends: HashMap<IncidentClass, Box<dyn DetectorBackend>>,
    failures: u64,
}

impl DetectorAdapter {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            failures: 0,
        }
    }

    /// Register the backend serving `class`, replacing any previous one.
    ///
    /// Continuous classes need a whole-frame classifier; the others need an
    /// object detector.
    pub fn register<B: DetectorBackend + 'static>(
        &mut self,
        class: IncidentClass,
        backend: B,
    ) -> Result<()> {
        let expected = capability_for(class);
        if backend.capability() != expected {
            return Err(anyhow!(
                "backend '{}' provides {:?}, but {} needs {:?}",
                backend.name(),
                backend.capability(),
                class,
                expected
            ));
        }
        self.backends.insert(class, Box::new(backend));
        Ok(())
    }

    /// Registered `(class, backend name)` pairs, in class order.
    pub fn list(&self) -> Vec<(IncidentClass, &'static str)> {
        let mut out: Vec<_> = self
            .backends
            .iter()
            .map(|(class, backend)| (*class, backend.name()))
            .collect();
        out.sort();
        out
    }

    /// Warm up every registered backend.
    pub fn warm_up(&mut self) -> Result<()> {
        for (class, backend) in self.backends.iter_mut() {
            backend
                .warm_up()
                .map_err(|e| anyhow!("warm-up of {} backend failed: {}", class, e))?;
        }
        Ok(())
    }

    /// Detections for one class on one frame. Never fails.
    pub fn detect(&mut self, frame: &Frame, class: IncidentClass) -> Vec<Detection> {
        let Some(backend) = self.backends.get_mut(&class) else {
            return Vec::new();
        };
        match backend.detect(frame) {
            Ok(detections) => {
                let continuous = class.is_continuous();
                detections
                    .into_iter()
                    .filter(|d| matches!(d, Detection::Scalar { .. }) == continuous)
                    .collect()
            }
            Err(e) => {
                self.failures += 1;
                log::debug!(
                    "{} detector '{}' failed on frame {}: {}",
                    class,
                    backend.name(),
                    frame.index,
                    e
                );
                Vec::new()
            }
        }
    }

    /// Number of detector calls that failed and were treated as empty.
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl Default for DetectorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn capability_for(class: IncidentClass) -> DetectionCapability {
    if class.is_continuous() {
        DetectionCapability::Classification
    } else {
        DetectionCapability::ObjectDetection
    }
}
