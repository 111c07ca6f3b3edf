mod logic;
pub(crate) mod archive; // Archive naming and validation
pub(crate) mod cleanup; // Local file removal
pub(crate) mod db_dump; // pg_dump | gzip pipeline
pub(crate) mod s3_upload; // S3 interactions

use chrono::Utc;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::Result;
use crate::utils::redact_database_url;

pub use logic::BackupReport;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug)]
pub enum BackupOutcome {
    /// No database URL configured; nothing was done.
    Skipped,
    Completed(BackupReport),
}

/// Process exit status for a job result: 0 for success or a skipped run, 1 otherwise.
pub fn exit_status<E>(result: &std::result::Result<BackupOutcome, E>) -> u8 {
    match result {
        Ok(_) => EXIT_SUCCESS,
        Err(_) => EXIT_FAILURE,
    }
}

/// Public entry point for one backup job run.
pub async fn run_backup_flow(app_config: Option<&AppConfig>) -> Result<BackupOutcome> {
    let Some(app_config) = app_config else {
        info!("BACKUP_DATABASE_URL is not set, nothing to back up");
        return Ok(BackupOutcome::Skipped);
    };

    info!(
        "Backing up {} to bucket {}",
        redact_database_url(&app_config.database_url),
        app_config.s3.bucket_name
    );

    let pipeline = db_dump::DumpPipeline::pg_dump(&app_config.database_url)?;
    let uploader = s3_upload::S3Uploader::from_config(&app_config.s3).await;

    let report = logic::perform_backup_orchestration(
        app_config,
        &pipeline,
        &uploader,
        &cleanup::LocalFileCleaner,
        Utc::now(),
        &std::env::temp_dir(),
    )
    .await?;

    Ok(BackupOutcome::Completed(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_database_url_is_a_noop() {
        let result = run_backup_flow(None).await;
        assert!(matches!(result, Ok(BackupOutcome::Skipped)));
        assert_eq!(exit_status(&result), EXIT_SUCCESS);
    }

    #[test]
    fn test_exit_status_for_errors() {
        let failed: std::result::Result<BackupOutcome, &str> = Err("boom");
        assert_eq!(exit_status(&failed), EXIT_FAILURE);
    }
}
