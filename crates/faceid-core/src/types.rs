use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output dimension of the embedding model (ArcFace w600k_r50).
pub const EMBEDDING_DIM: usize = 512;

/// One candidate face reported by the detector for a single image.
///
/// Owned transiently: produced by a detector call, consumed by the quality
/// gate, then discarded.
#[derive(Debug, Clone)]
pub struct RawDetection {
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Box corners `[x1, y1, x2, y2]` in pixels, not yet clamped to the image.
    pub bbox: [f32; 4],
    /// Raw (un-normalized) embedding vector.
    pub embedding: Vec<f32>,
}

/// Integer bounding box, clamped to image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Shorter side of the box, the face-size measure used by the gate.
    pub fn shorter_side(&self) -> u32 {
        self.width().min(self.height())
    }
}

/// Descriptive attributes of an accepted face. Immutable once constructed
/// and always describing the face that was actually selected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceMeta {
    pub det_score: f32,
    pub bbox: BoundingBox,
    /// Shorter side of the clamped box, in pixels.
    pub face_size: u32,
    /// Laplacian-variance sharpness score of the face crop.
    pub blur: f64,
    /// Total detections the detector reported for the source image.
    pub faces_found: usize,
}

/// A unit-normalized embedding paired with its metadata: the single output
/// of a successful quality-gate pass.
#[derive(Debug, Clone)]
pub struct AcceptedFace {
    /// L2-normalized embedding (norm == 1 within floating tolerance).
    pub embedding: Vec<f32>,
    pub meta: FaceMeta,
}

/// Descriptive fields of a registered person. Opaque pass-through data: the
/// core stores and returns them but never interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonDetails {
    pub full_name: String,
    pub document_number: String,
    pub sex: Option<u8>,
    pub citizenship: Option<String>,
    pub birth_date: Option<String>,
    pub visa_type: Option<String>,
    pub visa_number: Option<String>,
    pub entry_date: Option<String>,
    pub exit_date: Option<String>,
}

/// A registered identity snapshot, created exactly once per successful
/// registration and never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person_id: String,
    pub details: PersonDetails,
    /// Representative embedding (mean of accepted unit vectors; norm <= 1).
    pub embedding: Vec<f32>,
    /// Number of accepted photos the embedding aggregates.
    pub num_templates: u32,
    pub det_score: f32,
    pub blur: f64,
    pub face_size: u32,
    pub faces_found: u32,
    /// Reference to the persisted face crop.
    pub face_ref: String,
    pub created_at: DateTime<Utc>,
}

/// One corpus row as read back for matching. `embedding` is `None` when the
/// stored vector is missing or unreadable; the matcher skips such rows.
#[derive(Debug, Clone)]
pub struct CorpusEntry {
    pub person_id: String,
    pub embedding: Option<Vec<f32>>,
    pub details: PersonDetails,
    pub face_ref: Option<String>,
}

/// A ranked search hit: identifier plus a read-only snapshot of the
/// descriptive fields, copied at query time.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub person_id: String,
    /// Cosine similarity in [0, 1] (scores below the threshold never appear).
    pub similarity: f32,
    pub details: PersonDetails,
    pub face_ref: Option<String>,
}

/// L2 norm of a vector.
pub fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// True for vectors that must never be compared or stored: empty, containing
/// NaN/Inf, or with zero norm.
pub fn is_degenerate(values: &[f32]) -> bool {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return true;
    }
    l2_norm(values) == 0.0
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Backend(String),
    #[error("image store failure: {0}")]
    Image(String),
}

/// Detector capability: find faces in a decoded image and produce one raw
/// embedding per face. Assumed deterministic for identical input.
pub trait FaceDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectorError>;
}

/// Read-only snapshot of the registered corpus. No point-in-time consistency
/// is guaranteed across a long scan; one entry per person identifier.
#[allow(async_fn_in_trait)]
pub trait CorpusProvider {
    async fn all_embeddings(&self) -> Result<Vec<CorpusEntry>, StoreError>;
}

/// Persistence sink for registration snapshots.
#[allow(async_fn_in_trait)]
pub trait SnapshotSink {
    async fn insert_snapshot(&self, record: &PersonRecord) -> Result<(), StoreError>;
}

/// Store for accepted face crops.
#[allow(async_fn_in_trait)]
pub trait FaceImageStore {
    /// Persist the JPEG crop for a person, returning a reference to it.
    async fn save(&self, person_id: &str, jpeg: &[u8]) -> Result<String, StoreError>;
    /// Remove a previously saved crop. Used to unwind a failed commit.
    async fn remove(&self, reference: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_shorter_side() {
        let b = BoundingBox { x1: 10, y1: 20, x2: 110, y2: 80 };
        assert_eq!(b.width(), 100);
        assert_eq!(b.height(), 60);
        assert_eq!(b.shorter_side(), 60);
    }

    #[test]
    fn degenerate_vectors() {
        assert!(is_degenerate(&[]));
        assert!(is_degenerate(&[0.0, 0.0, 0.0]));
        assert!(is_degenerate(&[1.0, f32::NAN]));
        assert!(is_degenerate(&[1.0, f32::INFINITY]));
        assert!(!is_degenerate(&[0.0, 1.0]));
    }

    #[test]
    fn l2_norm_of_unit_vector() {
        assert!((l2_norm(&[0.6, 0.8]) - 1.0).abs() < 1e-6);
    }
}
