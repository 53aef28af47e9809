#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingRegion, Detection};
use crate::frame::Frame;

/// Candidate floor applied before NMS. Incident thresholds are applied later.
const CANDIDATE_FLOOR: f32 = 0.25;
const NMS_IOU: f32 = 0.45;

type Plan = TypedRunnableModel<TypedModel>;

fn load_plan(model_path: &Path, shape: [usize; 4]) -> Result<Plan> {
    tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(shape[0], shape[1], shape[2], shape[3])),
        )
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

/// Nearest-neighbour sample of channel `c` at model coordinate `(x, y)`.
fn sample(frame: &Frame, model_w: usize, model_h: usize, x: usize, y: usize, c: usize) -> f32 {
    let sx = (x * frame.width as usize / model_w).min(frame.width as usize - 1);
    let sy = (y * frame.height as usize / model_h).min(frame.height as usize - 1);
    let idx = (sy * frame.width as usize + sx) * 3 + c;
    frame.pixels()[idx] as f32 / 255.0
}

fn check_frame(frame: &Frame) -> Result<()> {
    if frame.width == 0 || frame.height == 0 {
        return Err(anyhow!("empty frame"));
    }
    Ok(())
}

/// YOLO-style object detector (`[1, 4 + classes, candidates]` output).
///
/// Loads a local model file and runs inference on RGB frames, resized to the
/// model input. Emits every candidate above a low floor after NMS.
pub struct TractObjectDetector {
    model: Plan,
    input: usize,
    labels: Vec<String>,
}

impl TractObjectDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input: usize, labels: Vec<String>) -> Result<Self> {
        let model = load_plan(model_path.as_ref(), [1, 3, input, input])?;
        Ok(Self {
            model,
            input,
            labels,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        check_frame(frame)?;
        let size = self.input;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            sample(frame, size, size, x, y, c)
        });
        Ok(input.into_tensor())
    }

    fn label(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class))
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let (channels, count) = (view.shape()[1], view.shape()[2]);
        if channels < 5 {
            return Err(anyhow!("model output has {} channels, need >= 5", channels));
        }

        let size = self.input as f32;
        let mut candidates: Vec<(usize, f32, BoundingRegion)> = Vec::new();
        for i in 0..count {
            let (class, score) = (4..channels)
                .map(|c| (c - 4, view[[0, c, i]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if !score.is_finite() || score < CANDIDATE_FLOOR {
                continue;
            }
            let (cx, cy, w, h) = (view[[0, 0, i]], view[[0, 1, i]], view[[0, 2, i]], view[[0, 3, i]]);
            let region = BoundingRegion::new((cx - w / 2.0) / size, (cy - h / 2.0) / size, w / size, h / size);
            candidates.push((class, score, region));
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut kept: Vec<(usize, f32, BoundingRegion)> = Vec::new();
        for cand in candidates {
            if kept.iter().all(|k| k.2.iou(&cand.2) < NMS_IOU) {
                kept.push(cand);
            }
        }

        Ok(kept
            .into_iter()
            .map(|(class, score, region)| Detection::discrete(self.label(class), score, region))
            .collect())
    }
}

impl DetectorBackend for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract-objects"
    }

    fn capability(&self) -> DetectionCapability {
        DetectionCapability::ObjectDetection
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}

/// Whole-frame classifier with a single sigmoid output (`[1, 1]`).
///
/// Input is NHWC, resized to a square of `input` pixels and scaled to 0..1.
pub struct TractFrameClassifier {
    model: Plan,
    input: usize,
}

impl TractFrameClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, input: usize) -> Result<Self> {
        let model = load_plan(model_path.as_ref(), [1, input, input, 3])?;
        Ok(Self { model, input })
    }
}

impl DetectorBackend for TractFrameClassifier {
    fn name(&self) -> &'static str {
        "tract-classifier"
    }

    fn capability(&self) -> DetectionCapability {
        DetectionCapability::Classification
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        check_frame(frame)?;
        let size = self.input;
        let input = tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
            sample(frame, size, size, x, y, c)
        })
        .into_tensor();
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let probability = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| anyhow!("model output was empty"))?;
        Ok(vec![Detection::scalar(probability)])
    }
}
