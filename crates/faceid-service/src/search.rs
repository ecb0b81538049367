//! Search orchestration: query photo in, ranked matches out.

use serde::Serialize;
use thiserror::Error;

use faceid_core::matcher;
use faceid_core::{CorpusProvider, GateConfig, GateRejection, MatchResult, StoreError};

use crate::analysis::{Analysis, AnalysisError, AnalysisHandle};

#[derive(Debug, Error)]
pub enum SearchError {
    /// Malformed image payload. Request-level.
    #[error("failed to decode photo: {0}")]
    Decode(String),
    /// Detector or worker-pool fault. Internal.
    #[error("analysis failed: {0}")]
    Analysis(String),
    /// Corpus read failure. Internal.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one search. An empty match list is a valid outcome: either
/// nothing scored above the threshold, or the query photo itself was
/// rejected (`rejection` carries the reason in that case).
#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    pub matches: Vec<MatchResult>,
    /// Corpus rows scanned before any filtering, for observability.
    pub scanned: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<GateRejection>,
}

/// Sequences one search end-to-end: decode → gate (search profile) →
/// linear corpus scan → ordered results.
pub struct SearchService<C> {
    analysis: AnalysisHandle,
    corpus: C,
}

impl<C: CorpusProvider> SearchService<C> {
    pub fn new(analysis: AnalysisHandle, corpus: C) -> Self {
        Self { analysis, corpus }
    }

    /// Search the corpus for the person in `photo`.
    ///
    /// A query photo with no confidently usable face is not an application
    /// error: the outcome is successful and empty, with the gate's reason
    /// attached.
    pub async fn search(
        &self,
        photo: Vec<u8>,
        threshold: f32,
        top_k: usize,
    ) -> Result<SearchOutcome, SearchError> {
        let analyzed = match self.analysis.analyze(photo, GateConfig::search()).await {
            Ok(Analysis::Accepted(photo)) => photo,
            Ok(Analysis::Rejected(rejection)) => {
                tracing::info!(%rejection, "query photo rejected, returning empty result");
                return Ok(SearchOutcome {
                    matches: Vec::new(),
                    scanned: 0,
                    rejection: Some(rejection),
                });
            }
            Err(AnalysisError::Decode(msg)) => return Err(SearchError::Decode(msg)),
            Err(other) => return Err(SearchError::Analysis(other.to_string())),
        };

        let corpus = self.corpus.all_embeddings().await?;
        let scanned = corpus.len();
        let matches = matcher::rank(&analyzed.face.embedding, &corpus, threshold, top_k);

        tracing::debug!(scanned, matches = matches.len(), threshold, "search completed");
        Ok(SearchOutcome {
            matches,
            scanned,
            rejection: None,
        })
    }
}
