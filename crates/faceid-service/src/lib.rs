//! faceid-service — request orchestration around the core.
//!
//! Sequencing per request is strictly decode → gate → match/persist. The
//! CPU-bound half (decode, detection, gating) runs on a bounded worker pool
//! so concurrent requests do not block each other on the detector; the
//! orchestrators themselves only do vector math, shaping and collaborator
//! calls.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod search;

pub use analysis::{spawn_analysis_pool, Analysis, AnalysisError, AnalysisHandle, AnalyzedPhoto};
pub use config::Config;
pub use ingest::{IngestError, IngestService, RegistrationRequest};
pub use search::{SearchError, SearchOutcome, SearchService};
