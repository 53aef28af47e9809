use serde::{Deserialize, Serialize};

/// Axis-aligned region in normalized (0..1) frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingRegion {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// The whole frame.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Intersection over union with another region.
    pub fn iou(&self, other: &BoundingRegion) -> f32 {
        let ix0 = self.x.max(other.x);
        let iy0 = self.y.max(other.y);
        let ix1 = (self.x + self.w).min(other.x + other.w);
        let iy1 = (self.y + self.h).min(other.y + other.h);
        let inter = (ix1 - ix0).max(0.0) * (iy1 - iy0).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Inclusive pixel bounds `(x0, y0, x1, y1)`, clamped to the frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let start = |v: f32, max: u32| -> u32 {
            ((v.clamp(0.0, 1.0) * max as f32) as u32).min(max.saturating_sub(1))
        };
        let end = |v: f32, max: u32| -> u32 {
            ((v.clamp(0.0, 1.0) * max as f32).ceil() as u32)
                .saturating_sub(1)
                .min(max.saturating_sub(1))
        };
        let x0 = start(self.x, width);
        let y0 = start(self.y, height);
        let x1 = end(self.x + self.w, width).max(x0);
        let y1 = end(self.y + self.h, height).max(y0);
        (x0, y0, x1, y1)
    }
}

/// Output of a detector capability for one frame.
///
/// Object detectors yield zero or more `Discrete` entries. Whole-frame
/// classifiers yield exactly one `Scalar` probability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Detection {
    Discrete {
        label: String,
        confidence: f32,
        region: BoundingRegion,
    },
    Scalar {
        probability: f32,
    },
}

impl Detection {
    pub fn discrete(label: impl Into<String>, confidence: f32, region: BoundingRegion) -> Self {
        Detection::Discrete {
            label: label.into(),
            confidence,
            region,
        }
    }

    pub fn scalar(probability: f32) -> Self {
        Detection::Scalar { probability }
    }

    /// Confidence (discrete) or probability (scalar), clamped to 0..=1.
    pub fn confidence(&self) -> f32 {
        let raw = match self {
            Detection::Discrete { confidence, .. } => *confidence,
            Detection::Scalar { probability } => *probability,
        };
        if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// First scalar probability in a detection list, if any.
pub fn scalar_score(detections: &[Detection]) -> Option<f32> {
    detections.iter().find_map(|d| match d {
        Detection::Scalar { .. } => Some(d.confidence()),
        Detection::Discrete { .. } => None,
    })
}
