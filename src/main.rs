//! PostgreSQL to S3 backup job
//!
//! Dumps the database configured in `BACKUP_DATABASE_URL`, uploads the
//! compressed archive to `AWS_S3_BUCKET` and removes the local copy.
//! Meant to be started by an external scheduler; takes no arguments.

// pg-s3-backup/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use anyhow::{Context, Result};
use backup::BackupOutcome;
use config::AppConfig;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine, the process environment is used as is
    dotenv::dotenv().ok();
    utils::logging::init_console_logging();

    info!("pg-s3-backup {}", env!("CARGO_PKG_VERSION"));

    let result = run_app().await;
    match &result {
        Ok(BackupOutcome::Skipped) => {}
        Ok(BackupOutcome::Completed(report)) => {
            info!(
                "✅ Backup {} uploaded ({} bytes), expires {}",
                report.key,
                report.size_bytes,
                report.expires.to_rfc3339()
            );
            info!("Local archive {} removed", report.local_path.display());
        }
        Err(e) => {
            error!("❌ Error while running backup: {:?}", e);
        }
    }

    ExitCode::from(backup::exit_status(&result))
}

async fn run_app() -> Result<BackupOutcome> {
    let app_config =
        AppConfig::from_env().context("Failed to load configuration from environment")?;

    if app_config.is_some() {
        info!("Backup started...");
    }

    let outcome = backup::run_backup_flow(app_config.as_ref())
        .await
        .context("Backup process failed")?;
    Ok(outcome)
}
