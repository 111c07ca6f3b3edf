use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backup::archive::{BackupArchive, expiration_from, validate_archive};
use crate::backup::cleanup::ArchiveCleaner;
use crate::backup::db_dump::{DumpPipeline, dump_to_file};
use crate::backup::s3_upload::{ObjectUploader, UploadRequest};
use crate::config::AppConfig;
use crate::errors::{BackupError, Result};

/// Summary of a completed job run.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub key: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub expires: DateTime<Utc>,
}

/// Dump, validate, upload, delete. Each step runs only if the previous one
/// succeeded; the first error is returned as is.
///
/// A failed upload leaves the local archive in place.
pub async fn perform_backup_orchestration(
    app_config: &AppConfig,
    pipeline: &DumpPipeline,
    uploader: &dyn ObjectUploader,
    cleaner: &dyn ArchiveCleaner,
    now: DateTime<Utc>,
    temp_root: &Path,
) -> Result<BackupReport> {
    info!("Initiating DB backup...");

    let archive = BackupArchive::for_timestamp(now, temp_root);

    // --- 1. Dump ---
    let dump_output = dump_to_file(pipeline, &archive.local_path).await?;
    validate_archive(&archive.local_path)?;
    info!("Backup archive file is valid");

    let size_bytes = std::fs::metadata(&archive.local_path)
        .map_err(|e| {
            BackupError::io(
                format!("Failed to stat {}", archive.local_path.display()),
                e,
            )
        })?
        .len();
    info!("Backup filesize: {}", ByteSize::b(size_bytes));

    if !dump_output.stderr.is_empty() {
        warn!(
            "Potential warnings detected; Please ensure the backup file \"{}\" contains all needed data",
            archive.file_name()
        );
    }
    info!("DB dumped to file...");

    // --- 2. Upload ---
    let expires = expiration_from(Utc::now(), app_config.s3.days_to_keep)?;
    let request = UploadRequest {
        key: archive.key.clone(),
        path: archive.local_path.clone(),
        expires,
    };
    uploader.upload(&request).await?;

    // --- 3. Cleanup ---
    cleaner.remove(&archive.local_path).await?;

    info!("DB backup complete ✅");
    Ok(BackupReport {
        key: archive.key,
        local_path: archive.local_path,
        size_bytes,
        expires,
    })
}
