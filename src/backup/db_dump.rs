// pg-s3-backup/src/backup/db_dump.rs
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

use crate::errors::{BackupError, Result};
use crate::utils::find_executable;

/// A program plus its arguments, one stage of the dump pipeline.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        CommandSpec {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn display_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// `dump | compress > file`, two processes joined by an OS pipe.
#[derive(Debug, Clone)]
pub struct DumpPipeline {
    pub dump: CommandSpec,
    pub compress: CommandSpec,
}

/// What a finished dump looked like. `stderr` is the dump stage's output,
/// which may hold warnings even on success.
#[derive(Debug, Clone)]
pub struct DumpOutput {
    pub stderr: String,
}

impl DumpPipeline {
    /// `pg_dump --dbname=<url> --format=tar | gzip`, both looked up on PATH.
    pub fn pg_dump(database_url: &str) -> Result<Self> {
        let pg_dump_path = find_executable("pg_dump")?;
        let gzip_path = find_executable("gzip")?;
        info!("Found pg_dump executable at: {}", pg_dump_path.display());

        Ok(Self::with_programs(pg_dump_path, gzip_path, database_url))
    }

    /// Builds the pg_dump pipeline from already resolved program paths.
    pub fn with_programs(pg_dump_path: PathBuf, gzip_path: PathBuf, database_url: &str) -> Self {
        DumpPipeline {
            dump: CommandSpec {
                program: pg_dump_path,
                args: vec![
                    format!("--dbname={}", database_url),
                    "--format=tar".to_string(),
                ],
            },
            compress: CommandSpec::new(gzip_path, &[]),
        }
    }

    /// Runs the pipeline to completion, writing the compressed stream to `target`.
    ///
    /// Blocks until both processes exit. Either stage exiting non-zero is a
    /// `Dump` error carrying that stage's stderr.
    pub fn run_to_file(&self, target: &Path) -> Result<DumpOutput> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::io(
                    format!("Failed to create backup directory {}", parent.display()),
                    e,
                )
            })?;
        }

        let output_file = File::create(target).map_err(|e| {
            BackupError::io(
                format!("Failed to create backup file {}", target.display()),
                e,
            )
        })?;

        let mut dump_child = self
            .dump
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BackupError::Spawn {
                command: self.dump.display_name(),
                source: e,
            })?;

        let Some(dump_stdout) = dump_child.stdout.take() else {
            let _ = dump_child.kill();
            return Err(BackupError::io(
                format!("Failed to capture stdout of {}", self.dump.display_name()),
                std::io::Error::other("stdout not piped"),
            ));
        };

        let compress_child = self
            .compress
            .command()
            .stdin(Stdio::from(dump_stdout))
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::piped())
            .spawn();

        let mut compress_child = match compress_child {
            Ok(child) => child,
            Err(e) => {
                let _ = dump_child.kill();
                let _ = dump_child.wait();
                return Err(BackupError::Spawn {
                    command: self.compress.display_name(),
                    source: e,
                });
            }
        };

        // The compressor's stderr is drained on its own thread so it never
        // stops reading the dump while we wait on pg_dump.
        let compress_stderr_reader = compress_child.stderr.take().map(spawn_stderr_reader);

        // Drain the dump's stderr while both run; the compressor consumes stdout.
        let dump_result = dump_child.wait_with_output().map_err(|e| {
            BackupError::io(format!("Failed to wait for {}", self.dump.display_name()), e)
        })?;
        let compress_status = compress_child.wait().map_err(|e| {
            BackupError::io(
                format!("Failed to wait for {}", self.compress.display_name()),
                e,
            )
        })?;
        let compress_stderr = match compress_stderr_reader {
            Some(reader) => reader.join().unwrap_or_default(),
            None => String::new(),
        };

        let dump_stderr = String::from_utf8_lossy(&dump_result.stderr)
            .trim_end()
            .to_string();

        if !dump_result.status.success() {
            return Err(BackupError::Dump {
                command: self.dump.display_name(),
                status: dump_result.status,
                stderr: dump_stderr,
            });
        }
        if !compress_status.success() {
            return Err(BackupError::Dump {
                command: self.compress.display_name(),
                status: compress_status,
                stderr: compress_stderr,
            });
        }

        Ok(DumpOutput {
            stderr: dump_stderr,
        })
    }
}

fn spawn_stderr_reader(mut pipe: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut raw = Vec::new();
        // A read error only loses diagnostics; the exit status still decides
        let _ = pipe.read_to_end(&mut raw);
        String::from_utf8_lossy(&raw).trim_end().to_string()
    })
}

/// Dumps the database into `target` on a blocking thread and logs any
/// warnings the dump printed.
pub async fn dump_to_file(pipeline: &DumpPipeline, target: &Path) -> Result<DumpOutput> {
    info!("Dumping DB to file {}...", target.display());

    let pipeline = pipeline.clone();
    let target_owned = target.to_path_buf();
    let output = tokio::task::spawn_blocking(move || pipeline.run_to_file(&target_owned))
        .await
        .map_err(|e| {
            BackupError::io(
                "Dump task panicked or was cancelled",
                std::io::Error::other(e.to_string()),
            )
        })??;

    // Not all text on stderr is a critical error
    if !output.stderr.is_empty() {
        warn!("pg_dump stderr: {}", output.stderr);
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    fn shell_pipeline(script: &str) -> DumpPipeline {
        DumpPipeline {
            dump: CommandSpec::new("sh", &["-c", script]),
            compress: CommandSpec::new("gzip", &[]),
        }
    }

    fn decompress(path: &Path) -> String {
        let mut content = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut content)
            .unwrap();
        content
    }

    #[test]
    fn test_pipeline_compresses_dump_output() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("2024/01/02/backup.tar.gz");

        let output = shell_pipeline("printf hello").run_to_file(&target).unwrap();

        assert!(output.stderr.is_empty());
        assert_eq!(decompress(&target), "hello");
    }

    #[test]
    fn test_pipeline_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a/b/c/backup.tar.gz");
        shell_pipeline("printf x").run_to_file(&target).unwrap();
        assert!(target.is_file());
    }

    #[test]
    fn test_pipeline_keeps_stderr_on_success() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");

        let output = shell_pipeline("printf data; echo 'warning: something odd' >&2")
            .run_to_file(&target)
            .unwrap();

        assert_eq!(output.stderr, "warning: something odd");
        assert_eq!(decompress(&target), "data");
    }

    #[test]
    fn test_pipeline_reports_dump_failure() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");

        let err = shell_pipeline("echo 'connection refused' >&2; exit 1")
            .run_to_file(&target)
            .unwrap_err();

        match err {
            BackupError::Dump {
                command,
                status,
                stderr,
            } => {
                assert_eq!(command, "sh");
                assert_eq!(status.code(), Some(1));
                assert_eq!(stderr, "connection refused");
            }
            other => panic!("expected dump error, got {:?}", other),
        }
    }

    #[test]
    fn test_pipeline_reports_compressor_failure() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");
        let pipeline = DumpPipeline {
            dump: CommandSpec::new("sh", &["-c", "printf hello"]),
            compress: CommandSpec::new("sh", &["-c", "cat >/dev/null; echo 'disk full' >&2; exit 3"]),
        };

        let err = pipeline.run_to_file(&target).unwrap_err();
        match err {
            BackupError::Dump { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "disk full");
            }
            other => panic!("expected dump error, got {:?}", other),
        }
    }

    #[test]
    fn test_pg_dump_pipeline_arguments() {
        let pipeline = DumpPipeline::with_programs(
            PathBuf::from("/usr/bin/pg_dump"),
            PathBuf::from("/usr/bin/gzip"),
            "postgres://user:pw@db:5432/app",
        );

        assert_eq!(pipeline.dump.program, PathBuf::from("/usr/bin/pg_dump"));
        assert_eq!(
            pipeline.dump.args,
            vec!["--dbname=postgres://user:pw@db:5432/app", "--format=tar"]
        );
        assert_eq!(pipeline.compress.program, PathBuf::from("/usr/bin/gzip"));
        assert!(pipeline.compress.args.is_empty());
    }

    #[test]
    fn test_compressor_stderr_does_not_stall_dump() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");
        // Compressor fills its stderr pipe before reading any input, while
        // the dump writes more than a pipe buffer to stdout
        let pipeline = DumpPipeline {
            dump: CommandSpec::new("sh", &["-c", "head -c 300000 /dev/zero"]),
            compress: CommandSpec::new(
                "sh",
                &[
                    "-c",
                    "i=0; while [ $i -lt 8000 ]; do echo 'gzip: noisy diagnostics line' >&2; i=$((i+1)); done; exec gzip",
                ],
            ),
        };

        let output = pipeline.run_to_file(&target).unwrap();

        assert!(output.stderr.is_empty());
        let mut raw = Vec::new();
        GzDecoder::new(File::open(&target).unwrap())
            .read_to_end(&mut raw)
            .unwrap();
        assert_eq!(raw.len(), 300_000);
    }

    #[test]
    fn test_pipeline_missing_program() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");
        let pipeline = DumpPipeline {
            dump: CommandSpec::new("/nonexistent/pg_dump", &[]),
            compress: CommandSpec::new("gzip", &[]),
        };

        let err = pipeline.run_to_file(&target).unwrap_err();
        assert!(matches!(err, BackupError::Spawn { .. }));
    }

    #[test]
    fn test_pipeline_large_stderr_does_not_block() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");

        // Well past a pipe buffer on stderr while stdout also flows
        let output = shell_pipeline(
            "i=0; while [ $i -lt 5000 ]; do echo 'notice: padding line for stderr' >&2; printf row; i=$((i+1)); done",
        )
        .run_to_file(&target)
        .unwrap();

        assert!(output.stderr.lines().count() >= 5000);
        assert!(decompress(&target).starts_with("rowrow"));
    }

    #[tokio::test]
    async fn test_dump_to_file_runs_off_the_runtime() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("backup.tar.gz");

        let output = dump_to_file(&shell_pipeline("printf hello"), &target)
            .await
            .unwrap();

        assert!(output.stderr.is_empty());
        assert_eq!(decompress(&target), "hello");
    }
}
