use std::path::PathBuf;

/// Service configuration, loaded from `FACEID_*` environment variables.
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite snapshot database.
    pub db_path: PathBuf,
    /// Directory for persisted face crops.
    pub images_dir: PathBuf,
    /// Number of analysis worker threads (each loads its own model pair).
    pub analysis_workers: usize,
    /// Bound of the analysis request queue.
    pub queue_depth: usize,
    /// Default similarity threshold for searches.
    pub search_threshold: f32,
    /// Default maximum number of search results.
    pub top_k: usize,
}

impl Config {
    /// Load configuration from the environment, with defaults under the
    /// XDG data directory.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACEID_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self {
            model_dir: std::env::var("FACEID_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("models")),
            db_path: std::env::var("FACEID_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("faceid.db")),
            images_dir: std::env::var("FACEID_IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("persons")),
            analysis_workers: env_usize("FACEID_ANALYSIS_WORKERS", 2),
            queue_depth: env_usize("FACEID_QUEUE_DEPTH", 4),
            search_threshold: env_f32("FACEID_SEARCH_THRESHOLD", 0.6),
            top_k: env_usize("FACEID_TOP_K", 5),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("faceid")
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_paths_derive_from_model_dir() {
        let config = Config {
            model_dir: PathBuf::from("/opt/faceid/models"),
            db_path: PathBuf::from("/tmp/faceid.db"),
            images_dir: PathBuf::from("/tmp/persons"),
            analysis_workers: 2,
            queue_depth: 4,
            search_threshold: 0.6,
            top_k: 5,
        };
        assert_eq!(
            config.scrfd_model_path(),
            PathBuf::from("/opt/faceid/models/det_10g.onnx")
        );
        assert_eq!(
            config.arcface_model_path(),
            PathBuf::from("/opt/faceid/models/w600k_r50.onnx")
        );
    }

    #[test]
    fn env_parsers_fall_back_to_defaults() {
        assert_eq!(env_usize("FACEID_TEST_UNSET_VAR", 7), 7);
        assert_eq!(env_f32("FACEID_TEST_UNSET_VAR", 0.25), 0.25);
    }
}
