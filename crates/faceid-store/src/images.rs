//! On-disk store for accepted face crops.

use std::path::PathBuf;

use faceid_core::{FaceImageStore, StoreError};

/// Writes face crops as `<dir>/<person_id>.jpg`.
#[derive(Debug, Clone)]
pub struct DiskImageStore {
    dir: PathBuf,
}

impl DiskImageStore {
    /// Create the store, making the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Image(format!("creating {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

impl FaceImageStore for DiskImageStore {
    async fn save(&self, person_id: &str, jpeg: &[u8]) -> Result<String, StoreError> {
        let path = self.dir.join(format!("{person_id}.jpg"));
        tokio::fs::write(&path, jpeg)
            .await
            .map_err(|e| StoreError::Image(format!("writing {}: {e}", path.display())))?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn remove(&self, reference: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(reference).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Image(format!("removing {reference}: {e}"))),
        }
    }
}
