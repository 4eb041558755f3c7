#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::label_for;
use crate::detect::result::{BoundingBox, Detection};

const DEFAULT_CONFIDENCE: f32 = 0.35;
const DEFAULT_IOU: f32 = 0.5;

/// YOLOv8 ONNX detector running on tract.
///
/// Frames are resized to the square model input, the `[1, 4 + classes, anchors]`
/// output is decoded into boxes, and per-class non-maximum suppression is applied.
/// Boxes are returned in the original frame's pixel coordinates.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for `input_size` x `input_size` inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the default NMS IoU threshold.
    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        let image = RgbImage::from_raw(width, height, pixels.to_vec())
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{} RGB", width, height))?;
        let side = self.input_size;
        let resized = image::imageops::resize(&image, side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, width: u32, height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;
        let (_, rows, anchors) = view.dim();
        if rows <= 4 {
            return Err(anyhow!("model output has no class rows"));
        }

        let sx = width as f32 / self.input_size as f32;
        let sy = height as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, i]]))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, w, h) = (
                view[[0, 0, i]],
                view[[0, 1, i]],
                view[[0, 2, i]],
                view[[0, 3, i]],
            );
            let bbox = BoundingBox::new(
                ((cx - w / 2.0) * sx).max(0.0),
                ((cy - h / 2.0) * sy).max(0.0),
                ((cx + w / 2.0) * sx).min(width as f32),
                ((cy + h / 2.0) * sy).min(height as f32),
            );
            candidates.push((class, Detection::new(label_for(class), score, bbox)));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, width, height)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = vec![0u8; (side * side * 3) as usize];
        self.detect(&blank, side, side).map(|_| ())
    }
}

fn non_max_suppression(mut candidates: Vec<(usize, Detection)>, iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class, det) in candidates {
        let suppressed = kept
            .iter()
            .any(|(k, other)| *k == class && intersection_over_union(&det.bbox, &other.bbox) > iou);
        if !suppressed {
            kept.push((class, det));
        }
    }
    kept.into_iter().map(|(_, det)| det).collect()
}

fn intersection_over_union(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter = BoundingBox::new(a.x1.max(b.x1), a.y1.max(b.y1), a.x2.min(b.x2), a.y2.min(b.y2))
        .area();
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_of_overlapping_same_class() {
        let a = Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 100.0, 100.0));
        let b = Detection::new("person", 0.6, BoundingBox::new(5.0, 5.0, 100.0, 100.0));
        let c = Detection::new("cup", 0.5, BoundingBox::new(5.0, 5.0, 100.0, 100.0));
        let kept = non_max_suppression(vec![(0, b), (0, a.clone()), (41, c.clone())], 0.5);
        assert_eq!(kept, vec![a, c]);
    }
}
