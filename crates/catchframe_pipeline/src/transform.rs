//! External transform runner.
//!
//! The transform is an opaque subprocess over a local input path producing a
//! local output path. Exit status zero is success; stdout and stderr are
//! captured for diagnostics either way.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::TransformConfig;

/// Longest stderr excerpt carried in an error message
const MAX_STDERR_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} succeeded but wrote no output at {path}")]
    MissingOutput { program: String, path: PathBuf },

    #[error("I/O error around transform: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a successful run.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[async_trait]
pub trait Transform: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Produce `output` from `input`. Must be bounded in time.
    async fn run(&self, input: &Path, output: &Path) -> Result<TransformOutput, TransformError>;
}

/// Runs a configured program with `{input}` / `{output}` substituted.
#[derive(Debug, Clone)]
pub struct CommandTransform {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTransform {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &TransformConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.timeout())
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Transform for CommandTransform {
    fn name(&self) -> &str {
        &self.program
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<TransformOutput, TransformError> {
        let args = self.render_args(input, output);
        debug!(program = %self.program, ?args, "Running transform");

        let started = Instant::now();
        // The child dies with this future on timeout or cancellation
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(result)) => result,
            Ok(Err(source)) => {
                return Err(TransformError::Spawn {
                    program: self.program.clone(),
                    source,
                })
            }
            Err(_) => {
                warn!(program = %self.program, timeout = ?self.timeout, "Transform timed out");
                return Err(TransformError::Timeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&result.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&result.stderr).into_owned();

        if !result.status.success() {
            warn!(
                program = %self.program,
                code = ?result.status.code(),
                "Transform failed. Output: {}",
                stderr
            );
            return Err(TransformError::Failed {
                program: self.program.clone(),
                code: result.status.code(),
                stderr: truncate(&stderr, MAX_STDERR_CHARS),
            });
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(TransformError::MissingOutput {
                program: self.program.clone(),
                path: output.to_path_buf(),
            });
        }

        Ok(TransformOutput {
            stdout,
            stderr,
            elapsed: started.elapsed(),
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}... (truncated)", head)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str, timeout: Duration) -> CommandTransform {
        CommandTransform::new(
            "sh",
            vec![
                "-c".to_string(),
                script.to_string(),
                "transform".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
            timeout,
        )
    }

    #[tokio::test]
    async fn substitutes_paths_and_captures_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.webm");
        let output = dir.path().join("out.mp4");
        std::fs::write(&input, b"frames").unwrap();

        let transform = sh("echo converting; cp \"$1\" \"$2\"", Duration::from_secs(10));
        let result = transform.run(&input, &output).await.unwrap();
        assert_eq!(result.stdout.trim(), "converting");
        assert_eq!(std::fs::read(&output).unwrap(), b"frames");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_stderr() {
        let dir = TempDir::new().unwrap();
        let transform = sh("echo 'invalid data' >&2; exit 1", Duration::from_secs(10));
        let err = transform
            .run(&dir.path().join("in"), &dir.path().join("out"))
            .await
            .unwrap_err();
        match err {
            TransformError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "invalid data");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        let dir = TempDir::new().unwrap();
        let transform = sh("sleep 5", Duration::from_millis(100));
        let err = transform
            .run(&dir.path().join("in"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Timeout { .. }));
    }

    #[tokio::test]
    async fn success_without_output_is_an_error() {
        let dir = TempDir::new().unwrap();
        let transform = sh("true", Duration::from_secs(10));
        let err = transform
            .run(&dir.path().join("in"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingOutput { .. }));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let transform = CommandTransform::new(
            "catchframe-no-such-program",
            vec!["{input}".into(), "{output}".into()],
            Duration::from_secs(1),
        );
        let err = transform
            .run(Path::new("/tmp/in"), Path::new("/tmp/out"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::Spawn { .. }));
    }

    #[test]
    fn truncates_long_stderr() {
        let long = "x".repeat(600);
        let short = truncate(&long, MAX_STDERR_CHARS);
        assert!(short.ends_with("... (truncated)"));
        assert_eq!(short.chars().filter(|c| *c == 'x').count(), 500);
    }
}
