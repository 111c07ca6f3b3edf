pub mod logging;

use crate::errors::{BackupError, Result};
use std::path::PathBuf;
use url::Url;
use which::which;

/// Finds an executable in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|e| BackupError::Spawn {
        command: name.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} executable not found in PATH: {}", name, e),
        ),
    })
}

/// Hides the password of a connection URL before it is logged.
///
/// Strings that are not URLs (e.g. libpq `key=value` conninfo) are replaced
/// entirely, since they may carry a password too.
pub fn redact_database_url(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "<connection string>".to_string(),
    }
}
