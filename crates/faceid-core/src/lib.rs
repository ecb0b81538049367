//! faceid-core — quality-gated face selection and identity matching.
//!
//! The core consumes detector output (candidate faces with embeddings),
//! filters it down to at most one usable face per image, and ranks query
//! embeddings against the registered corpus under cosine similarity.
//! Detection, persistence and the caller surface are collaborators reached
//! through the capability traits in [`types`].

pub mod aggregate;
pub mod blur;
pub mod matcher;
pub mod quality;
pub mod types;

pub use quality::{add_margin, select_best_face, GateConfig, GateRejection};
pub use types::{
    AcceptedFace, BoundingBox, CorpusEntry, CorpusProvider, DetectorError, FaceDetector,
    FaceImageStore, FaceMeta, MatchResult, PersonDetails, PersonRecord, RawDetection,
    SnapshotSink, StoreError, EMBEDDING_DIM,
};
