// pg-s3-backup/src/backup/archive.rs
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{BackupError, Result};

/// The single archive produced by one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    /// Object key, `YYYY/MM/DD/backup-<time>.tar.gz`.
    pub key: String,
    /// Local file the dump is written to before upload.
    pub local_path: PathBuf,
}

impl BackupArchive {
    /// Derives the key and local path from the run's timestamp.
    ///
    /// The local path mirrors the key below `temp_root`.
    pub fn for_timestamp(now: DateTime<Utc>, temp_root: &Path) -> Self {
        let key = archive_key(now);
        let local_path = temp_root.join(&key);
        BackupArchive { key, local_path }
    }

    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.key.clone())
    }
}

/// Builds `YYYY/MM/DD/backup-HH-MM-SS-mmmZ.tar.gz` from a UTC instant.
pub fn archive_key(now: DateTime<Utc>) -> String {
    // e.g. 2024-01-02T03:04:05.678Z
    let iso = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let (date, time) = iso.split_once('T').unwrap_or((iso.as_str(), ""));

    let nested_date = date.replace('-', "/");
    let mut time_component = String::with_capacity(time.len());
    let mut previous_was_separator = false;
    for c in time.chars() {
        if c == ':' || c == '.' {
            if !previous_was_separator {
                time_component.push('-');
            }
            previous_was_separator = true;
        } else {
            time_component.push(c);
            previous_was_separator = false;
        }
    }

    format!("{}/backup-{}.tar.gz", nested_date, time_component)
}

/// Instant the uploaded object expires: `uploaded_at` plus the retention window.
///
/// Fails when the result lies past the latest representable date.
pub fn expiration_from(uploaded_at: DateTime<Utc>, days_to_keep: u32) -> Result<DateTime<Utc>> {
    Duration::try_days(i64::from(days_to_keep))
        .and_then(|retention| uploaded_at.checked_add_signed(retention))
        .ok_or_else(|| {
            BackupError::Config(format!(
                "DAYS_TO_KEEP={} puts the expiration date out of range",
                days_to_keep
            ))
        })
}

/// Checks that the gzip archive at `path` decompresses to at least one byte.
///
/// An empty stream, a zero-byte file and anything that is not gzip are all
/// rejected as `InvalidArchive`.
pub fn validate_archive(path: &Path) -> Result<()> {
    let file = File::open(path)
        .map_err(|e| BackupError::io(format!("Failed to open archive {}", path.display()), e))?;
    let mut decoder = GzDecoder::new(file);
    let mut first_byte = [0u8; 1];

    match decoder.read(&mut first_byte) {
        Ok(1) => Ok(()),
        Ok(_) => Err(BackupError::InvalidArchive {
            path: path.to_path_buf(),
        }),
        Err(e) => {
            debug!("Failed to decompress {}: {}", path.display(), e);
            Err(BackupError::InvalidArchive {
                path: path.to_path_buf(),
            })
        }
    }
}
