#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::coco;
use crate::detect::result::Detection;

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single `[1, 3, size, size]` float input and a
/// `[1, 4 + classes, anchors]` output (box centre/size followed by class
/// scores). The transposed `[1, anchors, 4 + classes]` layout is accepted too.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    input_size: u32,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    class_id: usize,
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let input_size = if input_size == 0 {
            DEFAULT_INPUT_SIZE
        } else {
            input_size
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self { model, input_size })
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let candidates = decode_output(outputs, DEFAULT_MIN_CONFIDENCE)?;
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD)
            .into_iter()
            .map(|c| Detection::new(c.class_id, coco::class_name(c.class_id), c.confidence))
            .collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}

/// Turns raw YOLOv8 output into candidates at or above `min_confidence`.
fn decode_output(outputs: TVec<TValue>, min_confidence: f32) -> Result<Vec<Candidate>> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?
        .into_dimensionality::<tract_ndarray::Ix3>()
        .context("model output is not rank 3")?;

    let (_, rows, cols) = view.dim();
    // Features (4 + classes) are always fewer than anchors.
    let transposed = rows > cols;
    let (features, anchors) = if transposed { (cols, rows) } else { (rows, cols) };
    if features <= 4 {
        return Err(anyhow!("unexpected model output shape {:?}", view.dim()));
    }
    let at = |feature: usize, anchor: usize| {
        if transposed {
            view[[0, anchor, feature]]
        } else {
            view[[0, feature, anchor]]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (4..features)
            .map(|feature| (feature - 4, at(feature, anchor)))
            .fold((0, f32::NEG_INFINITY), |best, current| {
                if current.1 > best.1 {
                    current
                } else {
                    best
                }
            });
        if !confidence.is_finite() || confidence < min_confidence {
            continue;
        }
        let (cx, cy, w, h) = (
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        candidates.push(Candidate {
            class_id,
            confidence,
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        });
    }
    Ok(candidates)
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept.iter().any(|k| {
            k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = w * h;
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(class_id: usize, confidence: f32, x1: f32) -> Candidate {
        Candidate {
            class_id,
            confidence,
            x1,
            y1: 0.0,
            x2: x1 + 10.0,
            y2: 10.0,
        }
    }

    #[test]
    fn nms_drops_overlapping_boxes_of_same_class() {
        let kept = non_max_suppression(
            vec![
                candidate(0, 0.6, 1.0),
                candidate(0, 0.9, 0.0),
                candidate(0, 0.8, 50.0),
                candidate(2, 0.7, 0.0),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().any(|c| c.class_id == 2));
    }

    const FEATURES: usize = 84;
    const ANCHORS: usize = 100;

    /// YOLOv8 output with three populated anchors, everything else zero.
    fn yolo_output(transposed: bool) -> TVec<TValue> {
        let mut rows = vec![[0.0f32; FEATURES]; ANCHORS];
        // person, box centred at (50, 60), 20x40
        rows[0][..4].copy_from_slice(&[50.0, 60.0, 20.0, 40.0]);
        rows[0][4] = 0.9;
        rows[0][4 + 2] = 0.3;
        // car, best of several class scores
        rows[7][..4].copy_from_slice(&[200.0, 200.0, 10.0, 10.0]);
        rows[7][4] = 0.1;
        rows[7][4 + 2] = 0.55;
        // dog, below the floor
        rows[42][..4].copy_from_slice(&[300.0, 300.0, 10.0, 10.0]);
        rows[42][4 + 16] = 0.2;

        let array = if transposed {
            tract_ndarray::Array3::from_shape_fn((1, ANCHORS, FEATURES), |(_, a, f)| rows[a][f])
        } else {
            tract_ndarray::Array3::from_shape_fn((1, FEATURES, ANCHORS), |(_, f, a)| rows[a][f])
        };
        tvec!(array.into_tensor().into())
    }

    fn check_decoded(candidates: &[Candidate]) {
        assert_eq!(candidates.len(), 2);

        let person = &candidates[0];
        assert_eq!(person.class_id, 0);
        assert_eq!(person.confidence, 0.9);
        assert_eq!((person.x1, person.y1), (40.0, 40.0));
        assert_eq!((person.x2, person.y2), (60.0, 80.0));

        let car = &candidates[1];
        assert_eq!(car.class_id, 2);
        assert_eq!(car.confidence, 0.55);
        assert!(candidates.iter().all(|c| c.class_id != 16));
    }

    #[test]
    fn decodes_features_by_anchors_layout() {
        let candidates = decode_output(yolo_output(false), DEFAULT_MIN_CONFIDENCE).unwrap();
        check_decoded(&candidates);
    }

    #[test]
    fn decodes_anchors_by_features_layout() {
        let candidates = decode_output(yolo_output(true), DEFAULT_MIN_CONFIDENCE).unwrap();
        check_decoded(&candidates);
    }

    #[test]
    fn confidence_floor_is_applied() {
        let candidates = decode_output(yolo_output(false), 0.6).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 0);
    }

    #[test]
    fn output_without_class_scores_is_rejected() {
        let array = tract_ndarray::Array3::<f32>::zeros((1, 4, 10));
        let err = decode_output(tvec!(array.into_tensor().into()), DEFAULT_MIN_CONFIDENCE)
            .unwrap_err();
        assert!(err.to_string().contains("unexpected model output shape"));
    }
}
