//! SCRFD face detection over RGB photographs.
//!
//! Anchor-free decoding across three stride levels, with letterbox
//! preprocessing and IoU-based overlap suppression.

use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use crate::DetectError;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

/// A detected face in original-image coordinates.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Box corners [x1, y1, x2, y2].
    pub bbox: [f32; 4],
    pub confidence: f32,
    /// Five landmarks: [left eye, right eye, nose, left mouth, right mouth].
    pub landmarks: [(f32, f32); 5],
}

/// Letterbox geometry for mapping model coordinates back to the photo.
struct Mapping {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// SCRFD detector session.
pub struct ScrfdDetector {
    session: Session,
    /// Per-stride output tensor indices [score, bbox, kps] for strides 8/16/32.
    output_layout: [[usize; 3]; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model.
    pub fn load(model_path: &Path) -> Result<Self, DetectError> {
        if !model_path.exists() {
            return Err(DetectError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectError::InferenceFailed(format!(
                "SCRFD model must export 9 tensors (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let output_layout = resolve_output_layout(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            layout = ?output_layout,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            output_layout,
        })
    }

    /// Detect faces, returning them sorted by descending confidence.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let (tensor, mapping) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let mut found = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let [score_idx, bbox_idx, kps_idx] = self.output_layout[slot];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::InferenceFailed(format!("boxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            decode_stride(scores, boxes, kps, stride, &mapping, &mut found);
        }

        let mut kept = suppress_overlaps(found, IOU_THRESHOLD);
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(kept)
    }
}

/// Resolve output tensor ordering.
///
/// Exports may name tensors "score_8"/"bbox_16"/"kps_32" or use opaque
/// numeric names; in the latter case the standard positional layout applies:
/// [0-2] scores, [3-5] boxes, [6-8] keypoints, each over strides 8/16/32.
fn resolve_output_layout(names: &[String]) -> [[usize; 3]; 3] {
    let find = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| n == &wanted)
    };

    let mut layout = [[0usize; 3]; 3];
    for (slot, &stride) in STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => layout[slot] = [s, b, k],
            _ => {
                tracing::info!(?names, "unrecognized SCRFD output names, using positional layout");
                return [[0, 3, 6], [1, 4, 7], [2, 5, 8]];
            }
        }
    }
    layout
}

/// Letterbox the photo into the square model input and normalize.
///
/// The photo is resized to fit, centered, and padded with the pixel mean so
/// padding normalizes to zero.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Mapping) {
    let (w, h) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;
    let off_x = pad_x.floor() as u32;
    let off_y = pad_y.floor() as u32;

    // Zero-filled tensor == mean-padded input after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
    for (x, y, px) in resized.enumerate_pixels() {
        let tx = (x + off_x) as usize;
        let ty = (y + off_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (px.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, Mapping { scale, pad_x, pad_y })
}

/// Decode one stride level into detections in original-photo coordinates.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    mapping: &Mapping,
    out: &mut Vec<Detection>,
) {
    let grid = INPUT_SIZE as usize / stride;
    let num_anchors = grid * grid * ANCHORS_PER_CELL;

    let unmap = |x: f32, y: f32| -> (f32, f32) {
        (
            (x - mapping.pad_x) / mapping.scale,
            (y - mapping.pad_y) / mapping.scale,
        )
    };

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= SCORE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_cx = ((cell % grid) * stride) as f32;
        let anchor_cy = ((cell / grid) * stride) as f32;

        let b = idx * 4;
        if b + 3 >= boxes.len() {
            continue;
        }
        let (x1, y1) = unmap(
            anchor_cx - boxes[b] * stride as f32,
            anchor_cy - boxes[b + 1] * stride as f32,
        );
        let (x2, y2) = unmap(
            anchor_cx + boxes[b + 2] * stride as f32,
            anchor_cy + boxes[b + 3] * stride as f32,
        );

        // Alignment needs all five keypoints; drop anchors without them.
        let k = idx * 10;
        if k + 9 >= kps.len() {
            continue;
        }
        let mut landmarks = [(0.0f32, 0.0f32); 5];
        for (i, lm) in landmarks.iter_mut().enumerate() {
            *lm = unmap(
                anchor_cx + kps[k + i * 2] * stride as f32,
                anchor_cy + kps[k + i * 2 + 1] * stride as f32,
            );
        }

        out.push(Detection {
            bbox: [x1, y1, x2, y2],
            confidence: score,
            landmarks,
        });
    }
}

/// Intersection-over-union of two boxes.
fn overlap(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;

    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression, highest confidence first.
fn suppress_overlaps(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| overlap(&k.bbox, &det.bbox) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}
