// pg-s3-backup/src/config/mod.rs
use chrono::Utc;

use crate::backup::archive::expiration_from;
use crate::errors::{BackupError, Result};

pub const DEFAULT_DAYS_TO_KEEP: u32 = 30;

// Application's configuration structs, built once from the environment
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub days_to_keep: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub s3: S3Config,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Returns `Ok(None)` when `BACKUP_DATABASE_URL` is not set, in which case
    /// there is nothing to back up.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values behave like unset ones
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(database_url) = get("BACKUP_DATABASE_URL") else {
            return Ok(None);
        };

        let bucket_name = get("AWS_S3_BUCKET").ok_or_else(|| {
            BackupError::Config("AWS_S3_BUCKET must be set to upload backups".to_string())
        })?;

        let days_to_keep = match get("DAYS_TO_KEEP") {
            Some(raw) => parse_days_to_keep(&raw)?,
            None => DEFAULT_DAYS_TO_KEEP,
        };

        let force_path_style = match get("AWS_S3_FORCE_PATH_STYLE") {
            Some(raw) => parse_bool("AWS_S3_FORCE_PATH_STYLE", &raw)?,
            None => false,
        };

        Ok(Some(AppConfig {
            database_url,
            s3: S3Config {
                bucket_name,
                region: get("AWS_S3_REGION"),
                endpoint_url: get("AWS_S3_ENDPOINT"),
                force_path_style,
                days_to_keep,
            },
        }))
    }
}

fn parse_days_to_keep(raw: &str) -> Result<u32> {
    match raw.trim().parse::<u32>() {
        Ok(days) if days > 0 => {
            // Reject retention windows whose expiration date chrono cannot represent
            expiration_from(Utc::now(), days)?;
            Ok(days)
        }
        _ => Err(BackupError::Config(format!(
            "DAYS_TO_KEEP must be a positive whole number of days, got '{}'",
            raw
        ))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(BackupError::Config(format!(
            "{} must be true or false, got '{}'",
            key, raw
        ))),
    }
}
