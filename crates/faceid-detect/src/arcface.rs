//! ArcFace embedding extraction from aligned RGB face crops.

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use faceid_core::EMBEDDING_DIM;

use crate::align::ALIGNED_SIZE;
use crate::DetectError;

const PIXEL_MEAN: f32 = 127.5;
// Symmetric normalization, NOT the detector's 128.0.
const PIXEL_STD: f32 = 127.5;

/// ArcFace embedder session (w600k_r50, 512-dimensional output).
pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model.
    pub fn load(model_path: &Path) -> Result<Self, DetectError> {
        if !model_path.exists() {
            return Err(DetectError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded ArcFace model");
        Ok(Self { session })
    }

    /// Extract the raw embedding from an aligned 112×112 crop.
    ///
    /// The vector is returned un-normalized; the quality gate owns
    /// L2-normalization of accepted faces.
    pub fn embed(&mut self, aligned: &RgbImage) -> Result<Vec<f32>, DetectError> {
        let tensor = preprocess(aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(DetectError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }
        Ok(raw.to_vec())
    }
}

/// Pack the aligned RGB crop into a normalized NCHW tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x < size && y < size {
            for c in 0..3 {
                tensor[[0, c, y, x]] = (px.0[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn preprocess_shape() {
        let crop = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
        let tensor = preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn preprocess_symmetric_normalization() {
        let crop = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 0, 128]));
        let tensor = preprocess(&crop);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
        let mid = (128.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((tensor[[0, 2, 0, 0]] - mid).abs() < 1e-6);
    }
}
