//! Identity matching: rank a query embedding against the registered corpus.
//!
//! A brute-force linear scan, O(corpus × dimension) per query. That is the
//! right shape until corpus sizes justify an index; [`CorpusProvider`]
//! keeps the corpus behind a capability so an approximate-nearest-neighbor
//! provider can substitute later without changing this contract.

use std::cmp::Ordering;

use crate::types::{is_degenerate, l2_norm, CorpusEntry, MatchResult};

/// Cosine similarity: dot product over the product of L2 norms.
///
/// Not defensive on its own: callers guard against degenerate vectors and
/// discard non-finite scores.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
    }
    dot / (l2_norm(a) * l2_norm(b))
}

/// Rank the corpus against a query embedding.
///
/// A degenerate query (NaN/Inf components or zero norm) yields an empty
/// result, not an error. Corpus rows with missing, mismatched-length or
/// degenerate embeddings are silently skipped as bad historical data, not
/// a request-time fault. Retained matches score at or above
/// `threshold`, are sorted by descending similarity (stable, so corpus
/// order breaks ties) and truncated to `top_k`.
pub fn rank(
    query: &[f32],
    corpus: &[CorpusEntry],
    threshold: f32,
    top_k: usize,
) -> Vec<MatchResult> {
    if is_degenerate(query) {
        tracing::debug!("degenerate query embedding, returning no matches");
        return Vec::new();
    }

    let mut matches: Vec<MatchResult> = Vec::new();

    for entry in corpus {
        let Some(embedding) = entry.embedding.as_deref() else {
            continue;
        };
        if embedding.len() != query.len() || is_degenerate(embedding) {
            tracing::debug!(person_id = %entry.person_id, "skipping unusable stored embedding");
            continue;
        }

        let score = cosine_similarity(query, embedding);
        if !score.is_finite() {
            continue;
        }
        if score >= threshold {
            matches.push(MatchResult {
                person_id: entry.person_id.clone(),
                similarity: score,
                details: entry.details.clone(),
                face_ref: entry.face_ref.clone(),
            });
        }
    }

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    matches.truncate(top_k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PersonDetails;

    fn entry(person_id: &str, embedding: Option<Vec<f32>>) -> CorpusEntry {
        CorpusEntry {
            person_id: person_id.into(),
            embedding,
            details: PersonDetails {
                full_name: format!("person {person_id}"),
                document_number: format!("doc-{person_id}"),
                ..Default::default()
            },
            face_ref: None,
        }
    }

    #[test]
    fn nan_query_yields_empty_not_error() {
        let corpus = vec![entry("a", Some(vec![1.0, 0.0]))];
        assert!(rank(&[f32::NAN, 0.0], &corpus, 0.0, 5).is_empty());
    }

    #[test]
    fn inf_query_yields_empty() {
        let corpus = vec![entry("a", Some(vec![1.0, 0.0]))];
        assert!(rank(&[f32::INFINITY, 0.0], &corpus, 0.0, 5).is_empty());
    }

    #[test]
    fn zero_norm_query_yields_empty() {
        let corpus = vec![entry("a", Some(vec![1.0, 0.0]))];
        assert!(rank(&[0.0, 0.0], &corpus, 0.0, 5).is_empty());
    }

    #[test]
    fn zero_norm_corpus_entry_never_matches() {
        let corpus = vec![
            entry("zero", Some(vec![0.0, 0.0])),
            entry("good", Some(vec![1.0, 0.0])),
        ];
        let matches = rank(&[1.0, 0.0], &corpus, 0.0, 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].person_id, "good");
    }

    #[test]
    fn missing_and_mismatched_embeddings_skipped() {
        let corpus = vec![
            entry("missing", None),
            entry("short", Some(vec![1.0])),
            entry("nan", Some(vec![f32::NAN, 0.0])),
            entry("good", Some(vec![1.0, 0.0])),
        ];
        let matches = rank(&[1.0, 0.0], &corpus, 0.5, 5);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].person_id, "good");
    }

    #[test]
    fn threshold_filters_and_order_is_descending() {
        // Similarities against [1, 0]: 0.91, 0.40, 0.72 (up to rounding).
        let corpus = vec![
            entry("p91", Some(vec![0.91, (1.0f32 - 0.91 * 0.91).sqrt()])),
            entry("p40", Some(vec![0.40, (1.0f32 - 0.40 * 0.40).sqrt()])),
            entry("p72", Some(vec![0.72, (1.0f32 - 0.72 * 0.72).sqrt()])),
        ];
        let matches = rank(&[1.0, 0.0], &corpus, 0.6, 5);
        let ids: Vec<&str> = matches.iter().map(|m| m.person_id.as_str()).collect();
        assert_eq!(ids, vec!["p91", "p72"]);
        assert!((matches[0].similarity - 0.91).abs() < 1e-4);
        assert!((matches[1].similarity - 0.72).abs() < 1e-4);
    }

    #[test]
    fn threshold_is_inclusive() {
        let corpus = vec![entry("exact", Some(vec![1.0, 0.0]))];
        let matches = rank(&[1.0, 0.0], &corpus, 1.0, 5);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn truncated_to_top_k() {
        let corpus: Vec<CorpusEntry> = (0..10)
            .map(|i| entry(&format!("p{i}"), Some(vec![1.0, i as f32 * 0.01])))
            .collect();
        let matches = rank(&[1.0, 0.0], &corpus, 0.0, 3);
        assert_eq!(matches.len(), 3);
    }

    #[test]
    fn ties_keep_corpus_order() {
        let corpus = vec![
            entry("first", Some(vec![1.0, 0.0])),
            entry("second", Some(vec![2.0, 0.0])), // same direction, same score
        ];
        let matches = rank(&[1.0, 0.0], &corpus, 0.5, 5);
        assert_eq!(matches[0].person_id, "first");
        assert_eq!(matches[1].person_id, "second");
    }

    #[test]
    fn cosine_similarity_is_symmetric() {
        let a = [0.3f32, -0.5, 0.8, 0.1];
        let b = [0.9f32, 0.2, -0.1, 0.4];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn stored_norm_does_not_affect_score() {
        // An un-normalized stored mean must score the same as its normalized
        // form: the metric re-normalizes at comparison time.
        let half = vec![0.5f32, 0.5, 0.0];
        let unit = vec![std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2, 0.0];
        let query = [1.0f32, 0.0, 0.0];
        let s1 = cosine_similarity(&query, &half);
        let s2 = cosine_similarity(&query, &unit);
        assert!((s1 - s2).abs() < 1e-6);
    }
}
