//! The quality gate: from a detector's raw candidates, select the single
//! best usable face or reject the image outright.

use image::{imageops, Rgb, RgbImage};
use serde::Serialize;

use crate::blur::blur_score;
use crate::types::{l2_norm, AcceptedFace, BoundingBox, FaceMeta, RawDetection, EMBEDDING_DIM};

/// Acceptance thresholds for one gate pass.
#[derive(Debug, Clone, Copy)]
pub struct GateConfig {
    pub min_det_score: f32,
    /// Minimum shorter side of the face box, in pixels.
    pub min_face_size: u32,
    /// Minimum Laplacian-variance sharpness score.
    pub min_blur: f64,
    /// Symmetric margin added around the image before detection, as a
    /// fraction of width/height.
    pub margin_ratio: f32,
}

impl GateConfig {
    /// Strict thresholds for registration photos.
    pub fn registration() -> Self {
        Self {
            min_det_score: 0.60,
            min_face_size: 80,
            min_blur: 60.0,
            margin_ratio: 0.05,
        }
    }

    /// Looser thresholds for search queries.
    pub fn search() -> Self {
        Self {
            min_det_score: 0.45,
            min_face_size: 60,
            min_blur: 40.0,
            margin_ratio: 0.05,
        }
    }
}

/// Why an image produced no accepted face. Both cases are expected,
/// user-facing outcomes; downstream logic treats them identically (nothing
/// is persisted), but callers can surface the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateRejection {
    /// The detector reported no faces at all.
    NoFace,
    /// Faces were found but none cleared the thresholds.
    QualityTooLow { faces_found: usize },
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::NoFace => write!(f, "no face found"),
            GateRejection::QualityTooLow { faces_found } => {
                write!(f, "{faces_found} face(s) found, none passed quality thresholds")
            }
        }
    }
}

/// Add a symmetric white margin around the image, returning a new buffer.
///
/// Faces near the border clip against the detector's receptive field; a
/// small neutral margin reduces that. The caller's image is never mutated.
pub fn add_margin(image: &RgbImage, ratio: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let left = (w as f32 * ratio) as u32;
    let top = (h as f32 * ratio) as u32;

    let mut out = RgbImage::from_pixel(w + 2 * left, h + 2 * top, Rgb([255, 255, 255]));
    imageops::overlay(&mut out, image, left as i64, top as i64);
    out
}

/// Clamp raw box corners to image bounds: x1 ∈ [0, w-1], y1 ∈ [0, h-1],
/// x2 ∈ [0, w], y2 ∈ [0, h].
pub fn clamp_box(bbox: &[f32; 4], width: u32, height: u32) -> BoundingBox {
    let clamp = |v: f32, max: i64| -> u32 { (v as i64).clamp(0, max.max(0)) as u32 };
    BoundingBox {
        x1: clamp(bbox[0], width as i64 - 1),
        y1: clamp(bbox[1], height as i64 - 1),
        x2: clamp(bbox[2], width as i64),
        y2: clamp(bbox[3], height as i64),
    }
}

/// Copy the boxed region out of the image.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    imageops::crop_imm(image, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image()
}

/// Select the single best usable face, or reject the image.
///
/// `image` must be the same (margined) buffer the detections were produced
/// from, so box coordinates line up with the pixels being scored. For every
/// detection the box is clamped, degenerate boxes are skipped, and the crop
/// is scored for sharpness; a detection is a candidate only if confidence,
/// face size and blur all clear the thresholds. Among candidates the highest
/// confidence wins, first one reaching the maximum on ties.
///
/// Pure transform: same image and thresholds always yield the same accepted
/// face. On acceptance the embedding is L2-normalized; an embedding with the
/// wrong length or a degenerate value is a rejection, never a partial result.
pub fn select_best_face(
    image: &RgbImage,
    detections: &[RawDetection],
    config: &GateConfig,
) -> Result<AcceptedFace, GateRejection> {
    if detections.is_empty() {
        return Err(GateRejection::NoFace);
    }

    let (w, h) = image.dimensions();
    let faces_found = detections.len();
    let mut best: Option<(usize, FaceMeta)> = None;

    for (i, det) in detections.iter().enumerate() {
        let bbox = clamp_box(&det.bbox, w, h);
        if bbox.width() == 0 || bbox.height() == 0 {
            continue;
        }

        let face_size = bbox.shorter_side();
        let blur = blur_score(&crop_face(image, &bbox));

        if det.confidence < config.min_det_score
            || face_size < config.min_face_size
            || blur < config.min_blur
        {
            continue;
        }

        let improves = match &best {
            None => true,
            Some((_, meta)) => det.confidence > meta.det_score,
        };
        if improves {
            best = Some((
                i,
                FaceMeta {
                    det_score: det.confidence,
                    bbox,
                    face_size,
                    blur,
                    faces_found,
                },
            ));
        }
    }

    let Some((index, meta)) = best else {
        return Err(GateRejection::QualityTooLow { faces_found });
    };

    let raw = &detections[index].embedding;
    if raw.len() != EMBEDDING_DIM {
        tracing::warn!(
            expected = EMBEDDING_DIM,
            got = raw.len(),
            "rejecting face with unexpected embedding length"
        );
        return Err(GateRejection::QualityTooLow { faces_found });
    }

    let norm = l2_norm(raw);
    if !norm.is_finite() || norm <= 0.0 {
        tracing::warn!("rejecting face with degenerate embedding");
        return Err(GateRejection::QualityTooLow { faces_found });
    }

    Ok(AcceptedFace {
        embedding: raw.iter().map(|v| v / norm).collect(),
        meta,
    })
}
