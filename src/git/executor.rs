//! Async git command executor with semaphore-controlled concurrency
//!
//! Every invocation is a single `git -C <root> <args…>` subprocess whose
//! stdout, stderr, and exit code are captured. Non-zero exits surface as
//! structured failures carrying the echoed command line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::error::{Error, GitError, Result};

/// Default maximum concurrent git subprocesses
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Async git command executor rooted at one working directory
///
/// Uses a semaphore to bound concurrent subprocesses so batch operations
/// cannot exhaust process handles. Commands carry no timeout by default;
/// network operations block until git itself gives up.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    /// Directory passed to `git -C`
    root: PathBuf,
    /// Semaphore for concurrency control
    semaphore: Arc<Semaphore>,
    /// Optional per-command timeout
    timeout: Option<Duration>,
}

impl GitExecutor {
    /// Create an executor rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            semaphore: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            timeout: None,
        }
    }

    /// Set a per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The directory commands run against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run a git command and return its trimmed stdout
    ///
    /// A non-zero exit becomes [`GitError::CommandFailed`] with the command
    /// line, exit code, and stderr.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("git executor semaphore closed");

        let command_line = format!("git {}", args.join(" "));
        debug!("running {}", command_line);

        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.root)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match self.timeout {
            Some(limit) => match timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(GitError::CommandFailed {
                        command: command_line,
                        exit: -1,
                        stderr: format!("timed out after {limit:?}"),
                    }
                    .into())
                }
            },
            None => cmd.output().await,
        };

        let output = output.map_err(|source| GitError::SpawnFailed {
            command: command_line.clone(),
            source,
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
        } else {
            Err(GitError::CommandFailed {
                command: command_line,
                exit: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into())
        }
    }

    /// Run a git command, mapping a non-zero exit to `None`
    ///
    /// For probes where failure is an answer (`branch --contains` on an
    /// unknown sha, `config --get` on an unset key).
    pub async fn run_ok(&self, args: &[&str]) -> Result<Option<String>> {
        match self.run(args).await {
            Ok(stdout) => Ok(Some(stdout)),
            Err(Error::Git(GitError::CommandFailed { .. })) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Run a git command and split its stdout into non-empty lines
    pub async fn run_lines(&self, args: &[&str]) -> Result<Vec<String>> {
        let stdout = self.run(args).await?;
        Ok(split_lines(&stdout))
    }
}

/// Split command output into trimmed, non-empty lines
pub(crate) fn split_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines() {
        assert_eq!(
            split_lines("a\n\n b \nc\n"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_lines("").is_empty());
    }

    #[tokio::test]
    async fn test_run_captures_failure() {
        let executor = GitExecutor::new(std::env::temp_dir());
        let err = executor
            .run(&["rev-parse", "--verify", "definitely-not-a-ref"])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "GitFailure");
        assert!(err.to_string().contains("rev-parse"));
    }

    #[tokio::test]
    async fn test_run_ok_maps_failure_to_none() {
        let executor = GitExecutor::new(std::env::temp_dir());
        let result = executor
            .run_ok(&["rev-parse", "--verify", "definitely-not-a-ref"])
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
