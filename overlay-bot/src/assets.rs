//! Temporary on-disk artifacts for product images awaiting a batch run.

use overlay_common::{Error, Result, ResultExt};
use std::path::{Path, PathBuf};

/// Directory holding downloaded product images between upload and batch.
#[derive(Debug, Clone)]
pub struct TempAssets {
    dir: PathBuf,
}

impl TempAssets {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .context(format!("creating temp dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Write a downloaded product image and return its path.
    ///
    /// Names are unique per upload so a reset session never shares a file
    /// with a batch that is still running.
    pub async fn write_product(&self, user: &str, data: &[u8]) -> Result<PathBuf> {
        if user.is_empty() || user.contains(['/', '\\', '.']) {
            return Err(Error::InvalidInput(format!("unusable user id: {user:?}")));
        }

        let path = self
            .dir
            .join(format!("product_{user}_{}.img", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, data)
            .await
            .context(format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Delete an artifact. Missing files are fine; other failures are logged.
    pub async fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed temp artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "Failed to remove temp artifact: {e}"),
        }
    }
}
