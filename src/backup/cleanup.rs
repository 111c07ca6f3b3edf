// pg-s3-backup/src/backup/cleanup.rs
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::errors::{BackupError, Result};

#[async_trait]
pub trait ArchiveCleaner: Send + Sync {
    async fn remove(&self, path: &Path) -> Result<()>;
}

/// Deletes the local archive once it has been uploaded.
pub struct LocalFileCleaner;

#[async_trait]
impl ArchiveCleaner for LocalFileCleaner {
    async fn remove(&self, path: &Path) -> Result<()> {
        info!("Deleting local file {}...", path.display());
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| BackupError::Cleanup {
                path: path.to_path_buf(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.tar.gz");
        std::fs::write(&path, b"archive").unwrap();

        LocalFileCleaner.remove(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.tar.gz");

        let err = LocalFileCleaner.remove(&path).await.unwrap_err();
        assert!(matches!(err, BackupError::Cleanup { .. }));
    }
}
