//! SCRFD face detection via ONNX Runtime.
//!
//! Decodes the anchor-free score/bbox heads at strides 8/16/32 and
//! suppresses overlaps. Landmark heads, if the model exports them, are
//! ignored — the recognition path here works on plain crops.

use crate::provider::{FaceDetector, VisionError};
use crate::types::{BoundingBox, GrayImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const NMS_IOU_LIMIT: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector model unusable: {0}")]
    BadModel(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Candidate detection in frame coordinates, before integer conversion.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

/// SCRFD detector backend.
pub struct OnnxFaceDetector {
    session: Session,
    confidence: f32,
    /// Output tensor index of the (score, bbox) pair per stride.
    heads: [(usize, usize); 3],
}

impl OnnxFaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        Self::with_confidence(model_path, DEFAULT_CONFIDENCE)
    }

    pub fn with_confidence(model_path: &str, confidence: f32) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::BadModel(format!(
                "expected at least 6 outputs (score/bbox per stride), got {}",
                names.len()
            )));
        }
        let heads = map_heads(&names);

        tracing::info!(path = model_path, outputs = ?names, ?heads, "loaded SCRFD detector");

        Ok(Self { session, confidence, heads })
    }

    /// Letterbox the frame into the square model input, returning the
    /// tensor plus the (scale, pad_x, pad_y) needed to map boxes back.
    fn letterbox(&self, frame: &GrayImage) -> (Array4<f32>, f32, f32, f32) {
        let scale = (INPUT_SIZE as f32 / frame.width as f32)
            .min(INPUT_SIZE as f32 / frame.height as f32);
        let new_w = ((frame.width as f32 * scale).round() as u32).max(1);
        let new_h = ((frame.height as f32 * scale).round() as u32).max(1);
        let pad_x = (INPUT_SIZE as u32 - new_w) / 2;
        let pad_y = (INPUT_SIZE as u32 - new_h) / 2;

        let resized = frame.resize(new_w, new_h);

        // Pad with the mean so the border normalizes to zero.
        let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
        for y in 0..INPUT_SIZE {
            for x in 0..INPUT_SIZE {
                let inside = (x as u32) >= pad_x
                    && (x as u32) < pad_x + new_w
                    && (y as u32) >= pad_y
                    && (y as u32) < pad_y + new_h;
                let pixel = if inside {
                    resized.pixel(x as u32 - pad_x, y as u32 - pad_y) as f32
                } else {
                    PIXEL_MEAN
                };
                let value = (pixel - PIXEL_MEAN) / PIXEL_STD;
                for c in 0..3 {
                    tensor[[0, c, y, x]] = value;
                }
            }
        }

        (tensor, scale, pad_x as f32, pad_y as f32)
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        let (input, scale, pad_x, pad_y) = self.letterbox(frame);

        let outputs = self
            .session
            .run(ort::inputs![
                TensorRef::from_array_view(input.view())
                    .map_err(|e| VisionError::Detect(e.to_string()))?
            ])
            .map_err(|e| VisionError::Detect(e.to_string()))?;

        let mut candidates = Vec::new();
        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.heads[pos];
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Detect(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::Detect(format!("bboxes stride {stride}: {e}")))?;

            decode_stride(scores, bboxes, stride, self.confidence, &mut candidates);
        }

        let kept = non_max_suppression(candidates, NMS_IOU_LIMIT);

        // Back to frame space, clamped to integer pixel coordinates.
        let boxes = kept
            .into_iter()
            .filter_map(|c| {
                let x1 = ((c.x1 - pad_x) / scale).max(0.0);
                let y1 = ((c.y1 - pad_y) / scale).max(0.0);
                let x2 = ((c.x2 - pad_x) / scale).min(frame.width as f32);
                let y2 = ((c.y2 - pad_y) / scale).min(frame.height as f32);
                if x2 <= x1 + 1.0 || y2 <= y1 + 1.0 {
                    return None;
                }
                Some(BoundingBox::new(
                    x1 as u32,
                    y1 as u32,
                    (x2 - x1) as u32,
                    (y2 - y1) as u32,
                ))
            })
            .collect();

        Ok(boxes)
    }
}

/// Locate the score/bbox tensor per stride, by name when the export
/// uses the `score_8` / `bbox_8` convention, positionally otherwise
/// ([0-2] scores, [3-5] bboxes, strides ascending).
fn map_heads(names: &[String]) -> [(usize, usize); 3] {
    let find = |prefix: &str, stride: usize| names.iter().position(|n| n == &format!("{prefix}_{stride}"));

    let all_named = STRIDES
        .iter()
        .all(|&s| find("score", s).is_some() && find("bbox", s).is_some());

    if all_named {
        std::array::from_fn(|i| {
            let s = STRIDES[i];
            (find("score", s).unwrap(), find("bbox", s).unwrap())
        })
    } else {
        tracing::debug!(?names, "unrecognized output names, assuming positional layout");
        [(0, 3), (1, 4), (2, 5)]
    }
}

/// Decode one anchor-free head: offsets are in stride units relative to
/// the anchor center.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    confidence: f32,
    out: &mut Vec<Candidate>,
) {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;

    for idx in 0..anchors {
        let score = match scores.get(idx) {
            Some(&s) if s > confidence => s,
            _ => continue,
        };
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            break;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let cx = ((cell % grid) * stride) as f32;
        let cy = ((cell / grid) * stride) as f32;
        let s = stride as f32;

        out.push(Candidate {
            x1: cx - bboxes[off] * s,
            y1: cy - bboxes[off + 1] * s,
            x2: cx + bboxes[off + 2] * s,
            y2: cy + bboxes[off + 3] * s,
            score,
        });
    }
}

fn non_max_suppression(mut candidates: Vec<Candidate>, iou_limit: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Candidate> = Vec::new();
    'next: for c in candidates {
        for k in &kept {
            if iou(k, &c) > iou_limit {
                continue 'next;
            }
        }
        kept.push(c);
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_iou_disjoint() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = candidate(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = candidate(5.0, 0.0, 15.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_cluster() {
        let kept = non_max_suppression(
            vec![
                candidate(0.0, 0.0, 100.0, 100.0, 0.8),
                candidate(4.0, 4.0, 104.0, 104.0, 0.9),
                candidate(300.0, 300.0, 340.0, 340.0, 0.6),
            ],
            NMS_IOU_LIMIT,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_decode_stride_thresholds() {
        // One anchor above threshold, offsets of one stride unit each way.
        let grid = INPUT_SIZE / 32;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[2] = 0.9; // cell 1, first anchor
        let mut bboxes = vec![0.0f32; anchors * 4];
        bboxes[8..12].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let mut out = Vec::new();
        decode_stride(&scores, &bboxes, 32, 0.5, &mut out);

        assert_eq!(out.len(), 1);
        let c = out[0];
        // Cell 1 of the stride-32 grid is centered at x=32, y=0.
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (0.0, -32.0, 64.0, 32.0));
    }

    #[test]
    fn test_map_heads_named_and_shuffled() {
        let names: Vec<String> = ["bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(map_heads(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_map_heads_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_heads(&names), [(0, 3), (1, 4), (2, 5)]);
    }
}
