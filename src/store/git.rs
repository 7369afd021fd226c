//! Git-backed store
//!
//! The store is a Git repository cloned into `.gitalong/` under the managed
//! root. The document is a single `store.json` at the store root holding
//! the array of records. Writes commit and push; a rejected (non-fast-
//! forward) push refetches and retries on the backoff ladder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};

use super::{merge_records, modified_within, touch, RetryPolicy, DATA_DIRNAME};
use crate::config::Config;
use crate::error::{Error, GitError, Result, StoreError};
use crate::git::GitExecutor;
use crate::tracking::{Identity, TrackedCommit};

/// Basename of the store document at the store repository root
pub const STORE_DOCUMENT: &str = "store.json";

/// Fixed message for store commits
const COMMIT_MESSAGE: &str = "Update store.json";

/// Sentinel inside the store's `.git` dir debouncing fetches
const PULL_SENTINEL: &str = "gitalong.pulled";

/// Store backed by a Git repository cloned into `.gitalong/`
#[derive(Debug)]
pub struct GitStore {
    dir: PathBuf,
    executor: GitExecutor,
    pull_threshold: Duration,
    retry: RetryPolicy,
}

impl GitStore {
    /// Open the store clone, cloning it first if absent
    #[instrument(skip_all, fields(root = %managed_root.display()))]
    pub async fn open(managed_root: &Path, config: &Config) -> Result<Self> {
        let dir = managed_root.join(DATA_DIRNAME);
        if !dir.join(".git").exists() {
            debug!("cloning store from {}", config.store_url);
            GitExecutor::new(managed_root)
                .run(&["clone", &config.store_url, DATA_DIRNAME])
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        Ok(Self {
            executor: GitExecutor::new(&dir),
            dir,
            pull_threshold: config.pull_threshold(),
            retry: config.retry_policy(),
        })
    }

    /// Directory holding store state under the managed root
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self) -> PathBuf {
        self.dir.join(STORE_DOCUMENT)
    }

    async fn git_dir(&self) -> Result<PathBuf> {
        let out = self.executor.run(&["rev-parse", "--git-dir"]).await?;
        let path = PathBuf::from(out);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.dir.join(path))
        }
    }

    async fn branch(&self) -> Result<String> {
        self.executor
            .run(&["symbolic-ref", "--short", "HEAD"])
            .await
    }

    /// Force-advance the clone to the remote tip
    ///
    /// Skipped when the sentinel is younger than `pull_threshold`, unless
    /// `force` (writes always see the tip). An empty store remote is
    /// tolerated; the first push creates the branch.
    async fn refresh(&self, force: bool) -> Result<()> {
        let sentinel = self.git_dir().await?.join(PULL_SENTINEL);
        if !force && modified_within(&sentinel, self.pull_threshold) {
            return Ok(());
        }

        let branch = self.branch().await?;
        match self.executor.run(&["fetch", "origin", &branch]).await {
            Ok(_) => {
                self.executor.run(&["reset", "--hard", "FETCH_HEAD"]).await?;
            }
            Err(err) => {
                let heads = self
                    .executor
                    .run_ok(&["ls-remote", "--heads", "origin"])
                    .await?;
                match heads {
                    Some(out) if out.trim().is_empty() => {
                        debug!("store remote has no heads yet");
                    }
                    _ => return Err(StoreError::Unavailable(err.to_string()).into()),
                }
            }
        }

        touch(&sentinel)?;
        Ok(())
    }

    fn read_document(&self) -> Result<Vec<TrackedCommit>> {
        let path = self.document_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::MalformedDocument(e.to_string()).into())
    }

    fn write_document(&self, records: &[TrackedCommit]) -> Result<()> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::MalformedDocument(e.to_string()))?;
        std::fs::write(self.document_path(), content + "\n")?;
        Ok(())
    }

    /// Read all records, debounced by `pull_threshold`
    pub async fn snapshot(&self) -> Result<Vec<TrackedCommit>> {
        self.refresh(false).await?;
        self.read_document()
    }

    /// Publish a clone's slice merged with the observed remote state
    #[instrument(skip_all)]
    pub async fn commit(
        &self,
        identity: &Identity,
        remote_url: &str,
        slice: Vec<TrackedCommit>,
    ) -> Result<Vec<TrackedCommit>> {
        let mut attempt = 0u64;
        loop {
            // Re-observe inside the loop: a rejected push means someone
            // else advanced the store and their records must survive.
            self.refresh(true).await?;
            let observed = self.read_document()?;
            let merged = merge_records(observed, identity, remote_url, slice.clone());

            self.write_document(&merged)?;
            self.executor.run(&["add", STORE_DOCUMENT]).await?;
            if self
                .executor
                .run_ok(&["diff", "--cached", "--quiet"])
                .await?
                .is_some()
            {
                // Nothing staged; the store already holds this state.
                return Ok(merged);
            }

            self.executor
                .run(&[
                    "-c",
                    "user.name=gitalong",
                    "-c",
                    "user.email=gitalong@localhost",
                    "commit",
                    "-m",
                    COMMIT_MESSAGE,
                ])
                .await?;

            let branch = self.branch().await?;
            match self.executor.run(&["push", "origin", &branch]).await {
                Ok(_) => return Ok(merged),
                Err(Error::Git(GitError::CommandFailed { stderr, .. }))
                    if is_rejected_push(&stderr) =>
                {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        return Err(StoreError::Conflict { attempts: attempt }.into());
                    }
                    debug!("store push rejected, retry {}", attempt);
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(other) => {
                    return Err(StoreError::Unavailable(other.to_string()).into());
                }
            }
        }
    }
}

/// Whether a push failure means the remote advanced underneath us
fn is_rejected_push(stderr: &str) -> bool {
    stderr.contains("non-fast-forward")
        || stderr.contains("fetch first")
        || stderr.contains("[rejected]")
        || stderr.contains("cannot lock ref")
}
