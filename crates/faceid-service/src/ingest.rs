//! Registration orchestration: photos in, one committed PersonRecord out,
//! all-or-nothing.

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use uuid::Uuid;

use faceid_core::aggregate;
use faceid_core::types::is_degenerate;
use faceid_core::{
    FaceImageStore, GateConfig, GateRejection, PersonDetails, PersonRecord, SnapshotSink,
    StoreError,
};

use crate::analysis::{Analysis, AnalysisError, AnalysisHandle, AnalyzedPhoto};

const CROP_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum IngestError {
    /// No photo supplied at all; rejected before any processing.
    #[error("registration requires at least one photo")]
    NoPhoto,
    /// Malformed image payload. Request-level, never retried.
    #[error("failed to decode photo: {0}")]
    Decode(String),
    /// No supplied photo produced a usable face. Expected outcome, not a bug.
    #[error("registration rejected: {0}")]
    Rejected(GateRejection),
    /// Failed to encode the face crop for persistence.
    #[error("failed to encode face crop: {0}")]
    Encode(String),
    /// Detector or worker-pool fault. Internal.
    #[error("analysis failed: {0}")]
    Analysis(String),
    /// Persistence collaborator failure. Internal; nothing was committed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One registration request: photos of a single subject plus descriptive
/// fields the core passes through opaquely.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub photos: Vec<Vec<u8>>,
    pub details: PersonDetails,
}

/// Sequences one registration end-to-end with exactly-once-intent commit
/// semantics: quality gating per photo, embedding aggregation, then crop
/// save + snapshot insert as one logical commit.
pub struct IngestService<S, I> {
    analysis: AnalysisHandle,
    snapshots: S,
    images: I,
}

impl<S: SnapshotSink, I: FaceImageStore> IngestService<S, I> {
    pub fn new(analysis: AnalysisHandle, snapshots: S, images: I) -> Self {
        Self {
            analysis,
            snapshots,
            images,
        }
    }

    /// Register a person. Returns the freshly minted person id.
    ///
    /// Every photo is gated independently; the registration fails only if
    /// none passes. A photo that fails to *decode* fails the whole request:
    /// a malformed payload is a request fault, not a quality outcome.
    pub async fn ingest(&self, request: RegistrationRequest) -> Result<String, IngestError> {
        if request.photos.is_empty() {
            return Err(IngestError::NoPhoto);
        }

        let mut accepted: Vec<AnalyzedPhoto> = Vec::new();
        let mut rejection: Option<GateRejection> = None;

        for bytes in request.photos {
            match self.analysis.analyze(bytes, GateConfig::registration()).await {
                Ok(Analysis::Accepted(photo)) => accepted.push(*photo),
                Ok(Analysis::Rejected(r)) => {
                    tracing::debug!(rejection = %r, "photo rejected by quality gate");
                    // A threshold rejection is more informative than no-face.
                    rejection = match (rejection, r) {
                        (Some(prev @ GateRejection::QualityTooLow { .. }), GateRejection::NoFace) => {
                            Some(prev)
                        }
                        (_, r) => Some(r),
                    };
                }
                Err(AnalysisError::Decode(msg)) => return Err(IngestError::Decode(msg)),
                Err(other) => return Err(IngestError::Analysis(other.to_string())),
            }
        }

        if accepted.is_empty() {
            return Err(IngestError::Rejected(
                rejection.unwrap_or(GateRejection::NoFace),
            ));
        }

        let embeddings: Vec<&[f32]> =
            accepted.iter().map(|p| p.face.embedding.as_slice()).collect();
        let representative = aggregate::mean_embedding(&embeddings);

        // Hard invariant: a PersonRecord is never persisted with a
        // degenerate embedding, whatever earlier layers let through.
        if is_degenerate(&representative.values) {
            tracing::warn!("aggregated embedding degenerate, rejecting registration");
            return Err(IngestError::Rejected(GateRejection::QualityTooLow {
                faces_found: accepted.len(),
            }));
        }

        // Quality metadata and the stored crop come from the best accepted
        // photo: highest detection score, first one reaching it.
        let mut best = &accepted[0];
        for photo in &accepted[1..] {
            if photo.face.meta.det_score > best.face.meta.det_score {
                best = photo;
            }
        }

        let person_id = Uuid::new_v4().to_string();
        let jpeg = encode_jpeg(&best.crop)?;
        let face_ref = self.images.save(&person_id, &jpeg).await?;

        let meta = &best.face.meta;
        let record = PersonRecord {
            person_id: person_id.clone(),
            details: request.details,
            embedding: representative.values,
            num_templates: representative.num_templates,
            det_score: meta.det_score,
            blur: meta.blur,
            face_size: meta.face_size,
            faces_found: meta.faces_found as u32,
            face_ref: face_ref.clone(),
            created_at: Utc::now(),
        };

        if let Err(err) = self.snapshots.insert_snapshot(&record).await {
            // Crop save + snapshot insert form one logical commit: unwind
            // the crop so a failed insert leaves no partial registration.
            if let Err(cleanup) = self.images.remove(&face_ref).await {
                tracing::warn!(error = %cleanup, "failed to remove crop after aborted commit");
            }
            return Err(IngestError::Store(err));
        }

        tracing::info!(
            %person_id,
            num_templates = record.num_templates,
            det_score = record.det_score,
            "person registered"
        );
        Ok(person_id)
    }
}

fn encode_jpeg(crop: &RgbImage) -> Result<Vec<u8>, IngestError> {
    let mut buf = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, CROP_JPEG_QUALITY);
    crop.write_with_encoder(encoder)
        .map_err(|e| IngestError::Encode(e.to_string()))?;
    Ok(buf)
}
