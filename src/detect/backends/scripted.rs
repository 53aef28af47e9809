use anyhow::Result;
use serde::Deserialize;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingRegion, Detection};
use crate::frame::Frame;

/// One scripted detection, active for frame indices `from..=to`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub from: u64,
    pub to: u64,
    pub confidence: f32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub region: Option<BoundingRegion>,
}

impl ScheduleEntry {
    pub fn new(from: u64, to: u64, confidence: f32) -> Self {
        Self {
            from,
            to,
            confidence,
            label: None,
            region: None,
        }
    }

    fn covers(&self, index: u64) -> bool {
        index >= self.from && index <= self.to
    }
}

/// Deterministic backend that replays a schedule keyed by frame index.
///
/// Used when no model is configured and by tests. As a classifier it always
/// returns one probability: the highest scheduled value covering the frame,
/// or the baseline.
pub struct ScriptedBackend {
    capability: DetectionCapability,
    schedule: Vec<ScheduleEntry>,
    baseline: f32,
}

impl ScriptedBackend {
    pub fn objects(schedule: Vec<ScheduleEntry>) -> Self {
        Self {
            capability: DetectionCapability::ObjectDetection,
            schedule,
            baseline: 0.0,
        }
    }

    pub fn classifier(schedule: Vec<ScheduleEntry>, baseline: f32) -> Self {
        Self {
            capability: DetectionCapability::Classification,
            schedule,
            baseline,
        }
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capability(&self) -> DetectionCapability {
        self.capability
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let active = self.schedule.iter().filter(|e| e.covers(frame.index));
        match self.capability {
            DetectionCapability::ObjectDetection => Ok(active
                .map(|e| {
                    Detection::discrete(
                        e.label.clone().unwrap_or_else(|| "incident".to_string()),
                        e.confidence,
                        e.region
                            .unwrap_or_else(|| BoundingRegion::new(0.3, 0.3, 0.4, 0.4)),
                    )
                })
                .collect()),
            DetectionCapability::Classification => {
                let probability = active
                    .map(|e| e.confidence)
                    .fold(None, |acc: Option<f32>, c| Some(acc.map_or(c, |a| a.max(c))))
                    .unwrap_or(self.baseline);
                Ok(vec![Detection::scalar(probability)])
            }
        }
    }
}

/// Backend built from a closure, for ad hoc test streams.
pub struct FnBackend<F> {
    capability: DetectionCapability,
    func: F,
}

impl<F> FnBackend<F>
where
    F: FnMut(&Frame) -> Result<Vec<Detection>> + Send,
{
    pub fn new(capability: DetectionCapability, func: F) -> Self {
        Self { capability, func }
    }
}

impl<F> DetectorBackend for FnBackend<F>
where
    F: FnMut(&Frame) -> Result<Vec<Detection>> + Send,
{
    fn name(&self) -> &'static str {
        "fn"
    }

    fn capability(&self) -> DetectionCapability {
        self.capability
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (self.func)(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_schedule_is_inclusive() {
        let mut backend = ScriptedBackend::objects(vec![ScheduleEntry::new(10, 12, 0.8)]);
        let at = |i| Frame::filled(i, 2, 2, [0, 0, 0]).unwrap();
        assert!(backend.detect(&at(9)).unwrap().is_empty());
        assert_eq!(backend.detect(&at(10)).unwrap().len(), 1);
        assert_eq!(backend.detect(&at(12)).unwrap().len(), 1);
        assert!(backend.detect(&at(13)).unwrap().is_empty());
    }

    #[test]
    fn classifier_falls_back_to_baseline() {
        let mut backend = ScriptedBackend::classifier(
            vec![ScheduleEntry::new(0, 4, 0.3), ScheduleEntry::new(2, 3, 0.95)],
            0.05,
        );
        let at = |i| Frame::filled(i, 2, 2, [0, 0, 0]).unwrap();
        assert_eq!(backend.detect(&at(0)).unwrap(), vec![Detection::scalar(0.3)]);
        assert_eq!(backend.detect(&at(2)).unwrap(), vec![Detection::scalar(0.95)]);
        assert_eq!(backend.detect(&at(7)).unwrap(), vec![Detection::scalar(0.05)]);
    }
}
