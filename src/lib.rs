//! Gitalong - Git coordination for non-mergeable files
//!
//! Gitalong layers a small coordination protocol on top of Git: every clone
//! publishes a compact record of its local state to a shared store and
//! consults that store before allowing modification. Teams working with
//! binary assets (art, audio, compiled resources) use it to avoid editing
//! the same file from two places at once.
//!
//! # Modules
//!
//! - [`repository`] - Orchestration: update, status, claim, release
//! - [`tracking`] - Tracked-commit records and the commit-spread classifier
//! - [`store`] - Shared store backends (Git repository or hosted JSON document)
//! - [`git`] - Subprocess queries over the managed repository
//! - [`batch`] - Bounded-concurrency batch execution
//! - [`setup`] - Repository setup: config, store, .gitignore, hooks
//! - [`config`] - The `.gitalong.json` document
//! - [`error`] - Error types

pub mod batch;
pub mod config;
pub mod error;
pub mod git;
pub mod repository;
pub mod setup;
pub mod store;
pub mod tracking;

pub use config::Config;
pub use error::{Error, Result};
pub use repository::{ClaimStatus, FileStatus, ReleaseStatus, Repository};
pub use tracking::{CommitSpread, Identity, TrackedCommit};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
