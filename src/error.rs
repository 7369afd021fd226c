//! Error types for gitalong
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display`
//! and `Error` impls. Every error maps to a stable kind string that the CLI
//! prints alongside the message.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for gitalong
#[derive(Error, Debug)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable kind string surfaced on stderr next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Git(GitError::NotARepository(_)) => "NotARepository",
            Self::Git(_) => "GitFailure",
            Self::Store(StoreError::Conflict { .. }) => "StoreConflict",
            Self::Store(_) => "StoreUnavailable",
            Self::Config(ConfigError::NotSetUp(_)) => "NotSetUp",
            Self::Config(ConfigError::AlreadySetUp(_)) => "AlreadySetUp",
            Self::Config(_) => "InvalidConfig",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::Io(_) => "Io",
        }
    }
}

/// Errors from git subprocess invocations
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("`{command}` exited with code {exit}: {stderr}")]
    CommandFailed {
        command: String,
        exit: i32,
        stderr: String,
    },

    #[error("Failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("Failed to parse git output: {0}")]
    ParseError(String),
}

/// Errors from the shared store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Unavailable(String),

    #[error("Store write conflict persisted after {attempts} attempts")]
    Conflict { attempts: u64 },

    #[error("Store lock at {path} still held after {waited:?}")]
    LockTimeout {
        path: PathBuf,
        waited: std::time::Duration,
    },

    #[error("Store document is malformed: {0}")]
    MalformedDocument(String),
}

/// Errors around the `.gitalong.json` document
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Gitalong is not set up on this repository ({0} is missing)")]
    NotSetUp(PathBuf),

    #[error("Gitalong is already set up on this repository ({0} exists)")]
    AlreadySetUp(PathBuf),

    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::NotSetUp(PathBuf::from("/tmp/repo/.gitalong.json"));
        assert!(err.to_string().contains("not set up"));

        let err = GitError::CommandFailed {
            command: "git push origin main".to_string(),
            exit: 1,
            stderr: "rejected".to_string(),
        };
        assert!(err.to_string().contains("git push origin main"));
        assert!(err.to_string().contains("rejected"));

        let err = StoreError::Conflict { attempts: 5 };
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_error_kind() {
        let err: Error = ConfigError::NotSetUp(PathBuf::from(".gitalong.json")).into();
        assert_eq!(err.kind(), "NotSetUp");

        let err: Error = StoreError::Conflict { attempts: 5 }.into();
        assert_eq!(err.kind(), "StoreConflict");

        let err: Error = StoreError::Unavailable("gone".into()).into();
        assert_eq!(err.kind(), "StoreUnavailable");

        let err = Error::PermissionDenied(PathBuf::from("asset.png"));
        assert_eq!(err.kind(), "PermissionDenied");
    }
}
