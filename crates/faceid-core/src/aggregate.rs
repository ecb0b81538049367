//! Aggregation of multiple accepted photos into one representative embedding.

/// Representative embedding for a person, with the count of photos that
/// contributed to it.
#[derive(Debug, Clone)]
pub struct RepresentativeEmbedding {
    pub values: Vec<f32>,
    pub num_templates: u32,
}

/// Component-wise arithmetic mean of unit-normalized embeddings.
///
/// The result is deliberately NOT re-normalized: a mean of unit vectors
/// generally has norm < 1, and the matcher divides by both norms at
/// comparison time, so the stored norm carries no correctness weight.
///
/// Never called on an empty set: zero accepted photos is a hard rejection
/// upstream.
pub fn mean_embedding(embeddings: &[&[f32]]) -> RepresentativeEmbedding {
    debug_assert!(!embeddings.is_empty(), "aggregator requires at least one embedding");

    let dim = embeddings[0].len();
    let mut acc = vec![0.0f64; dim];
    for emb in embeddings {
        debug_assert_eq!(emb.len(), dim, "mismatched embedding lengths");
        for (a, v) in acc.iter_mut().zip(emb.iter()) {
            *a += *v as f64;
        }
    }

    let n = embeddings.len() as f64;
    RepresentativeEmbedding {
        values: acc.iter().map(|a| (a / n) as f32).collect(),
        num_templates: embeddings.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::l2_norm;

    #[test]
    fn mean_of_two_unit_vectors() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0];
        let agg = mean_embedding(&[&a, &b]);
        assert_eq!(agg.num_templates, 2);
        assert_eq!(agg.values, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn single_photo_passes_through() {
        let a = [0.6f32, 0.8, 0.0];
        let agg = mean_embedding(&[&a]);
        assert_eq!(agg.num_templates, 1);
        assert_eq!(agg.values, a.to_vec());
    }

    #[test]
    fn mean_is_not_renormalized() {
        // Mean of two orthogonal unit vectors has norm 1/sqrt(2).
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let agg = mean_embedding(&[&a, &b]);
        let norm = l2_norm(&agg.values);
        assert!((norm - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}
