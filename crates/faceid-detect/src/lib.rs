//! faceid-detect — ONNX implementation of the face-detector capability.
//!
//! Fuses SCRFD face detection, five-point alignment and ArcFace embedding
//! extraction into a single `detect(image) -> candidates` call, one raw
//! embedding per found face.

use std::path::PathBuf;

use thiserror::Error;

pub mod align;
pub mod analyzer;
pub mod arcface;
pub mod scrfd;

pub use analyzer::OnnxFaceAnalyzer;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("model file not found: {} — download from insightface and place in the model dir", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}
