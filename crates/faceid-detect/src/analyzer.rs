//! Fused detector capability: SCRFD → alignment → ArcFace per face.

use std::path::Path;

use image::RgbImage;

use faceid_core::{DetectorError, FaceDetector, RawDetection};

use crate::align;
use crate::arcface::ArcFaceEmbedder;
use crate::scrfd::ScrfdDetector;
use crate::DetectError;

/// The ONNX-backed face analyzer: one detection pass plus one embedding
/// extraction per found face, mirroring InsightFace's fused analysis call.
pub struct OnnxFaceAnalyzer {
    detector: ScrfdDetector,
    embedder: ArcFaceEmbedder,
}

impl OnnxFaceAnalyzer {
    /// Load both models. Fails fast if either file is missing.
    pub fn load(scrfd_path: &Path, arcface_path: &Path) -> Result<Self, DetectError> {
        Ok(Self {
            detector: ScrfdDetector::load(scrfd_path)?,
            embedder: ArcFaceEmbedder::load(arcface_path)?,
        })
    }
}

impl FaceDetector for OnnxFaceAnalyzer {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, DetectorError> {
        let faces = self.detector.detect(image).map_err(DetectorError::from)?;

        let mut detections = Vec::with_capacity(faces.len());
        for face in faces {
            let aligned = align::align_face(image, &face.landmarks);
            let embedding = self.embedder.embed(&aligned).map_err(DetectorError::from)?;
            detections.push(RawDetection {
                confidence: face.confidence,
                bbox: face.bbox,
                embedding,
            });
        }

        tracing::debug!(faces = detections.len(), "analyzed image");
        Ok(detections)
    }
}

impl From<DetectError> for DetectorError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::ModelNotFound(_) => DetectorError::Unavailable(err.to_string()),
            DetectError::InferenceFailed(_) | DetectError::Ort(_) => {
                DetectorError::Inference(err.to_string())
            }
        }
    }
}
