//! The shared store of tracked commits
//!
//! A store is a mutable set of [`TrackedCommit`] records shared by every
//! clone of the managed repository. Two backends exist: a Git repository
//! cloned into `.gitalong/` and a hosted JSON document reached over HTTP.
//! Writers only ever replace their own records; the merge rule keeps
//! concurrent commits from different clones commutative.

mod git;
mod http;
mod lock;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use git::*;
pub use http::*;
pub use lock::*;

use crate::config::Config;
use crate::error::Result;
use crate::tracking::{Identity, TrackedCommit};

/// Basename of the lockfile serializing same-clone store mutations
pub const LOCK_BASENAME: &str = "store.lock";

/// Directory under the managed root holding store state
pub const DATA_DIRNAME: &str = ".gitalong";

/// Retry discipline for store writes
///
/// Exponential backoff with a cap; exhaustion surfaces as a store conflict.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum write attempts
    pub attempts: u64,
    /// First backoff delay
    pub base: Duration,
    /// Upper bound on any single delay
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based)
    pub fn backoff(&self, attempt: u64) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16) as u32;
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Merge a clone's new slice into the observed store state
///
/// Persisted contents are `(observed \ mine) ∪ slice` where "mine" matches
/// `(host, user, remote)`. Records published by other clones are never
/// touched, which makes concurrent commits by different identities commute.
pub fn merge_records(
    observed: Vec<TrackedCommit>,
    identity: &Identity,
    remote_url: &str,
    slice: Vec<TrackedCommit>,
) -> Vec<TrackedCommit> {
    let mut merged: Vec<TrackedCommit> = observed
        .into_iter()
        .filter(|record| !(record.remote == remote_url && record.is_mine(identity)))
        .collect();
    merged.extend(slice);
    merged
}

/// Whether a store URL selects the JSON-document backend
///
/// HTTP(S) URLs that are not Git remotes point at a hosted JSON document;
/// everything else (SSH, file paths, `.git` URLs) is a Git repository.
pub fn is_http_document_url(url: &str) -> bool {
    (url.starts_with("https://") || url.starts_with("http://"))
        && !url.trim_end_matches('/').ends_with(".git")
}

/// The shared store, dispatching over its backend
#[derive(Debug)]
pub enum Store {
    Git(GitStore),
    Http(HttpStore),
}

impl Store {
    /// Open (and initialize if needed) the store for a managed repository
    pub async fn open(managed_root: &Path, config: &Config) -> Result<Self> {
        if is_http_document_url(&config.store_url) {
            Ok(Self::Http(HttpStore::new(managed_root, config)?))
        } else {
            Ok(Self::Git(GitStore::open(managed_root, config).await?))
        }
    }

    /// Consistent read of all records (refresh debounced by `pull_threshold`)
    pub async fn snapshot(&self) -> Result<Vec<TrackedCommit>> {
        match self {
            Self::Git(store) => store.snapshot().await,
            Self::Http(store) => store.snapshot().await,
        }
    }

    /// Replace this clone's contribution, merged with the observed state
    ///
    /// Returns the merged set once durability is confirmed.
    pub async fn commit(
        &self,
        identity: &Identity,
        remote_url: &str,
        slice: Vec<TrackedCommit>,
    ) -> Result<Vec<TrackedCommit>> {
        match self {
            Self::Git(store) => store.commit(identity, remote_url, slice).await,
            Self::Http(store) => store.commit(identity, remote_url, slice).await,
        }
    }

    /// Acquire the same-clone mutation lock
    pub async fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(self.lock_path()).await
    }

    fn lock_path(&self) -> PathBuf {
        let dir = match self {
            Self::Git(store) => store.data_dir(),
            Self::Http(store) => store.data_dir(),
        };
        dir.join(LOCK_BASENAME)
    }
}

/// Whether a file was modified within the last `threshold`
pub(crate) fn modified_within(path: &Path, threshold: Duration) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match modified.elapsed() {
        Ok(elapsed) => elapsed < threshold,
        // Clock skew puts the mtime in the future; count it as fresh.
        Err(_) => true,
    }
}

/// Create or bump the mtime of a sentinel file
pub(crate) fn touch(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.set_modified(std::time::SystemTime::now())?;
    Ok(())
}
