//! Repository core - orchestrates the probe, the store, and the classifier
//!
//! `Repository` owns one managed clone's view of the coordination protocol:
//! it computes the clone's published slice, merges it into the store, and
//! answers per-file queries (last commit, status, claim, release) against a
//! snapshot that stays consistent for the whole CLI run.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::batch::BatchExecutor;
use crate::config::Config;
use crate::error::Result;
use crate::git::GitProbe;
use crate::store::Store;
use crate::tracking::{CommitSpread, Identity, TrackedCommit};

/// One managed clone and its store connection
#[derive(Debug)]
pub struct Repository {
    probe: GitProbe,
    config: Config,
    identity: Identity,
    remote_url: String,
    store: Store,
    batch: BatchExecutor,
    /// Store snapshot shared by every query in one CLI run
    snapshot: Mutex<Option<Arc<Vec<TrackedCommit>>>>,
}

impl Repository {
    /// Open the managed repository containing `path`
    ///
    /// Fails with `NotSetUp` when `.gitalong.json` is absent.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn find(path: impl AsRef<Path>) -> Result<Self> {
        let discovered = GitProbe::discover(path).await?;
        let root = std::fs::canonicalize(discovered.root())
            .unwrap_or_else(|_| discovered.root().to_path_buf());
        let probe = GitProbe::new(root.clone());

        let config = Config::load(&root)?;
        if config.modify_permissions {
            // Permission churn must never show up as a tracked change.
            probe
                .executor()
                .run(&["config", "core.fileMode", "false"])
                .await?;
        }

        let identity = Identity::detect(&probe).await?;
        let remote_url = probe.remote_url().await?;
        let store = Store::open(&root, &config).await?;

        debug!(
            "opened {} as {}@{}",
            root.display(),
            identity.user,
            identity.host
        );

        Ok(Self {
            probe,
            config,
            identity,
            remote_url,
            store,
            batch: BatchExecutor::new(),
            snapshot: Mutex::new(None),
        })
    }

    /// The managed repository root
    pub fn root(&self) -> &Path {
        self.probe.root()
    }

    /// The loaded configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// This clone's identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The managed repository's origin URL
    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    /// Current branch name, or `None` for a detached HEAD
    pub async fn active_branch(&self) -> Result<Option<String>> {
        self.probe.active_branch().await
    }

    /// Recompute and publish this clone's slice of the store
    ///
    /// Walks local and remote-tracking branch tips, rebuilds the
    /// uncommitted record, merges into the store, then applies the
    /// permission pass last.
    #[instrument(skip(self))]
    pub async fn update(&self) -> Result<()> {
        let _lock = self.store.lock().await?;
        let observed = self.store.snapshot().await?;
        let slice = self.build_slice(&observed, &[], &[]).await?;
        let merged = self
            .store
            .commit(&self.identity, &self.remote_url, slice)
            .await?;
        self.cache_snapshot(merged.clone()).await;

        if self.config.modify_permissions {
            self.apply_permissions(&merged).await?;
        }
        info!("published {} records", merged.len());
        Ok(())
    }

    /// The record with the highest claim on a path, if any
    ///
    /// Priority: my uncommitted record, then anyone else's uncommitted
    /// record, then the newest real commit covering the path.
    pub async fn last_commit(&self, path: &str) -> Result<Option<TrackedCommit>> {
        let records = self.snapshot_records().await?;
        let relative = self.relative_path(path);
        Ok(last_commit_in(
            &records,
            &self.identity,
            &self.remote_url,
            &relative,
            self.config.track_uncommitted,
        )
        .cloned())
    }

    /// Classify a list of paths against the same snapshot
    pub async fn statuses(&self, paths: &[String]) -> Result<Vec<FileStatus>> {
        let records = self.snapshot_records().await?;
        let active = self.probe.active_branch().await?;
        let track_uncommitted = self.config.track_uncommitted;

        let relatives: Vec<(String, String)> = paths
            .iter()
            .map(|path| (path.clone(), self.relative_path(path)))
            .collect();

        let results = self
            .batch
            .run(relatives, |_, (path, relative)| {
                let records = Arc::clone(&records);
                let identity = self.identity.clone();
                let remote_url = self.remote_url.clone();
                let active = active.clone();
                async move {
                    let commit = last_commit_in(
                        &records,
                        &identity,
                        &remote_url,
                        &relative,
                        track_uncommitted,
                    )
                    .cloned();
                    Ok(FileStatus::new(path, commit, &identity, active.as_deref()))
                }
            })
            .await;

        results.into_iter().collect()
    }

    /// Reserve paths for exclusive editing
    ///
    /// Per-path decisions run on the batch pool against one snapshot and
    /// report in input order; the whole batch publishes once. Partial
    /// success is allowed; each path reports independently.
    #[instrument(skip(self))]
    pub async fn claim(&self, paths: &[String]) -> Result<Vec<ClaimStatus>> {
        let _lock = self.store.lock().await?;
        let observed = Arc::new(self.store.snapshot().await?);
        let active = self.probe.active_branch().await?;
        let modify_permissions = self.config.modify_permissions;

        let relatives: Vec<String> = paths.iter().map(|path| self.relative_path(path)).collect();

        // A batch's own claims never block each other (same owner), so the
        // per-path decisions are independent against the one snapshot.
        let results = self
            .batch
            .run(relatives.clone(), |_, relative| {
                let observed = Arc::clone(&observed);
                let identity = self.identity.clone();
                let remote_url = self.remote_url.clone();
                let active = active.clone();
                let probe = self.probe.clone();
                async move {
                    // Uncommitted records always weigh in here, even when
                    // the clone does not publish its own: claims travel on
                    // them.
                    let blocker =
                        last_commit_in(&observed, &identity, &remote_url, &relative, true).filter(
                            |record| {
                                let spread =
                                    CommitSpread::classify(record, &identity, active.as_deref());
                                !spread.intersects(
                                    CommitSpread::MINE_UNCOMMITTED
                                        | CommitSpread::MINE_ACTIVE_BRANCH,
                                )
                            },
                        );

                    if let Some(record) = blocker {
                        return Ok(ClaimStatus::Blocked(Box::new(record.clone())));
                    }
                    if modify_permissions && probe.file_exists(&relative) {
                        if let Err(err) = probe.set_writable(&relative, true) {
                            warn!("cannot make {} writable: {}", relative, err);
                            return Ok(ClaimStatus::Unwritable(probe.root().join(&relative)));
                        }
                    }
                    Ok(ClaimStatus::Granted)
                }
            })
            .await;
        let statuses: Vec<ClaimStatus> = results.into_iter().collect::<Result<_>>()?;

        let granted: Vec<String> = relatives
            .iter()
            .zip(&statuses)
            .filter(|(_, status)| status.is_granted())
            .map(|(relative, _)| relative.clone())
            .collect();

        let slice = self.build_slice(&observed, &granted, &[]).await?;
        let merged = self
            .store
            .commit(&self.identity, &self.remote_url, slice)
            .await?;
        self.cache_snapshot(merged).await;

        Ok(statuses)
    }

    /// Give up claims on paths
    ///
    /// Fails per-path when the file was modified locally; an edit implies
    /// an implicit claim that only a commit-and-update cycle clears.
    #[instrument(skip(self))]
    pub async fn release(&self, paths: &[String]) -> Result<Vec<ReleaseStatus>> {
        let _lock = self.store.lock().await?;
        let observed = Arc::new(self.store.snapshot().await?);
        let working = Arc::new(
            self.probe
                .working_changes(&self.config.tracked_extensions)
                .await?,
        );
        let mine = observed
            .iter()
            .find(|r| {
                r.remote == self.remote_url && r.is_uncommitted() && r.is_mine(&self.identity)
            })
            .cloned();

        let relatives: Vec<String> = paths.iter().map(|path| self.relative_path(path)).collect();

        let results = self
            .batch
            .run(relatives.clone(), |_, relative| {
                let working = Arc::clone(&working);
                let mine = mine.clone();
                let identity = self.identity.clone();
                let remote_url = self.remote_url.clone();
                async move {
                    if working.iter().any(|w| w == &relative) {
                        let blocker = mine.unwrap_or_else(|| {
                            TrackedCommit::uncommitted(
                                &identity,
                                &remote_url,
                                working.to_vec(),
                                Vec::new(),
                            )
                        });
                        return Ok(ReleaseStatus::ModifiedLocally(Box::new(blocker)));
                    }
                    Ok(ReleaseStatus::Released)
                }
            })
            .await;
        let statuses: Vec<ReleaseStatus> = results.into_iter().collect::<Result<_>>()?;

        let released: Vec<String> = relatives
            .iter()
            .zip(&statuses)
            .filter(|(_, status)| status.is_released())
            .map(|(relative, _)| relative.clone())
            .collect();

        let slice = self.build_slice(&observed, &[], &released).await?;
        let merged = self
            .store
            .commit(&self.identity, &self.remote_url, slice)
            .await?;
        self.cache_snapshot(merged).await;

        if self.config.modify_permissions {
            for relative in &released {
                if !self.probe.file_exists(relative) {
                    continue;
                }
                if let Err(err) = self.probe.set_writable(relative, false) {
                    warn!("failed to re-lock {}: {}", relative, err);
                }
            }
        }

        Ok(statuses)
    }

    /// The cached snapshot for this CLI run, reading the store on first use
    async fn snapshot_records(&self) -> Result<Arc<Vec<TrackedCommit>>> {
        let mut cached = self.snapshot.lock().await;
        if let Some(records) = cached.as_ref() {
            return Ok(Arc::clone(records));
        }
        let records = Arc::new(self.store.snapshot().await?);
        *cached = Some(Arc::clone(&records));
        Ok(records)
    }

    async fn cache_snapshot(&self, records: Vec<TrackedCommit>) {
        *self.snapshot.lock().await = Some(Arc::new(records));
    }

    /// Build this clone's full slice: branch-tip records plus the
    /// uncommitted record
    async fn build_slice(
        &self,
        observed: &[TrackedCommit],
        add_claims: &[String],
        drop_claims: &[String],
    ) -> Result<Vec<TrackedCommit>> {
        let mut slice = Vec::new();
        if let Some(record) = self
            .uncommitted_record(observed, add_claims, drop_claims)
            .await?
        {
            slice.push(record);
        }
        slice.extend(self.branch_records().await?);
        slice.retain(|record| !record.is_empty());
        Ok(slice)
    }

    /// One record per distinct branch-tip commit, local tips first
    async fn branch_records(&self) -> Result<Vec<TrackedCommit>> {
        let locals = self.probe.local_branches().await?;
        let remotes = self.probe.remote_branches().await?;

        let mut seen = HashSet::new();
        let tips: Vec<String> = locals
            .iter()
            .chain(remotes.iter())
            .filter_map(|(_, sha)| seen.insert(sha.clone()).then(|| sha.clone()))
            .collect();

        let results = self
            .batch
            .run(tips, |_, sha| {
                let probe = self.probe.clone();
                let remote_url = self.remote_url.clone();
                let host = self.identity.host.clone();
                async move { TrackedCommit::from_sha(&probe, &remote_url, &host, &sha).await }
            })
            .await;

        results.into_iter().collect()
    }

    /// Rebuild the uncommitted record from live working-tree state
    ///
    /// Claims survive from the previous record unless the claimant began
    /// editing (the path shows up in working changes), the claim is being
    /// dropped, or the file stopped being writable under permission
    /// management. Changes are the union of working changes and surviving
    /// claims.
    async fn uncommitted_record(
        &self,
        observed: &[TrackedCommit],
        add_claims: &[String],
        drop_claims: &[String],
    ) -> Result<Option<TrackedCommit>> {
        let working = self
            .probe
            .working_changes(&self.config.tracked_extensions)
            .await?;
        let old = observed.iter().find(|r| {
            r.remote == self.remote_url && r.is_uncommitted() && r.is_mine(&self.identity)
        });

        let mut claims: Vec<String> = Vec::new();
        let candidates = old
            .map(|r| r.claims.clone())
            .unwrap_or_default()
            .into_iter()
            .chain(add_claims.iter().cloned());
        for claim in candidates {
            if drop_claims.contains(&claim) || working.contains(&claim) {
                continue;
            }
            if self.config.modify_permissions
                && self.probe.file_exists(&claim)
                && !self.probe.is_writable(&claim)
            {
                continue;
            }
            if !claims.contains(&claim) {
                claims.push(claim);
            }
        }

        let mut changes: Vec<String> = if self.config.track_uncommitted {
            working
        } else {
            Vec::new()
        };
        for claim in &claims {
            if !changes.contains(claim) {
                changes.push(claim.clone());
            }
        }

        if changes.is_empty() && claims.is_empty() {
            return Ok(None);
        }

        let mut record =
            TrackedCommit::uncommitted(&self.identity, &self.remote_url, changes, claims);
        // An unchanged record keeps its date so republishing is idempotent.
        if let Some(old) = old {
            if old.changes == record.changes && old.claims == record.claims {
                record.date = old.date;
                record.summary = old.summary.clone();
            }
        }
        Ok(Some(record))
    }

    /// Apply read-only/writable bits across the working tree
    ///
    /// A tracked-extension file stays writable iff it is in this clone's
    /// uncommitted changes or claims, or no other record marks it changed.
    async fn apply_permissions(&self, merged: &[TrackedCommit]) -> Result<()> {
        let files = self
            .probe
            .tracked_extension_files(&self.config.tracked_extensions)
            .await?;

        let mine: HashSet<&str> = merged
            .iter()
            .filter(|r| {
                r.remote == self.remote_url && r.is_uncommitted() && r.is_mine(&self.identity)
            })
            .flat_map(|r| r.changes.iter().chain(r.claims.iter()))
            .map(String::as_str)
            .collect();
        let held: HashSet<&str> = merged
            .iter()
            .filter(|r| r.remote == self.remote_url && !r.is_mine(&self.identity))
            .flat_map(|r| r.changes.iter())
            .map(String::as_str)
            .collect();

        for file in &files {
            if !self.probe.file_exists(file) {
                continue;
            }
            let writable = mine.contains(file.as_str()) || !held.contains(file.as_str());
            if let Err(err) = self.probe.set_writable(file, writable) {
                warn!("failed to set permissions on {}: {}", file, err);
            }
        }
        Ok(())
    }

    /// Normalize CLI input to a repository-relative path
    pub fn relative_path(&self, input: &str) -> String {
        let given = Path::new(input);
        let absolute = if given.is_absolute() {
            given.to_path_buf()
        } else if given.exists() {
            std::env::current_dir()
                .map(|cwd| cwd.join(given))
                .unwrap_or_else(|_| self.root().join(given))
        } else {
            self.root().join(given)
        };
        let absolute = std::fs::canonicalize(&absolute).unwrap_or(absolute);
        match absolute.strip_prefix(self.root()) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => input.trim_start_matches("./").replace('\\', "/"),
        }
    }

}

/// Pick the record with the highest claim on a path from one snapshot
fn last_commit_in<'a>(
    records: &'a [TrackedCommit],
    identity: &Identity,
    remote_url: &str,
    relative: &str,
    track_uncommitted: bool,
) -> Option<&'a TrackedCommit> {
    let relevant: Vec<&TrackedCommit> = records
        .iter()
        .filter(|r| {
            r.remote == remote_url
                && r.covers(relative)
                && (track_uncommitted || !r.is_uncommitted())
        })
        .collect();

    if let Some(mine) = relevant
        .iter()
        .find(|r| r.is_uncommitted() && r.is_mine(identity))
        .copied()
    {
        return Some(mine);
    }
    if let Some(other) = relevant
        .iter()
        .filter(|r| r.is_uncommitted())
        .max_by_key(|r| r.date)
        .copied()
    {
        return Some(other);
    }
    relevant
        .into_iter()
        .filter(|r| !r.is_uncommitted())
        // Same commit observed by several publishers ties on date; the
        // caller's own projection wins so a pulled commit reads as local.
        .max_by_key(|r| (r.date, r.is_mine(identity)))
}

/// Per-path classification result
#[derive(Debug, Clone)]
pub struct FileStatus {
    /// The path as given on the command line
    pub path: String,
    /// Where the path's last commit lives across the fleet
    pub spread: CommitSpread,
    /// The record behind the classification, if any
    pub commit: Option<TrackedCommit>,
}

impl FileStatus {
    /// Classify a record (or its absence) for one path
    pub fn new(
        path: String,
        commit: Option<TrackedCommit>,
        identity: &Identity,
        active_branch: Option<&str>,
    ) -> Self {
        let spread = commit
            .as_ref()
            .map(|record| CommitSpread::classify(record, identity, active_branch))
            .unwrap_or_default();
        Self {
            path,
            spread,
            commit,
        }
    }
}

impl fmt::Display for FileStatus {
    /// `<spread> <path> <sha> <local-branches> <remote-branches> <host> <author>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(value: &str) -> &str {
            if value.is_empty() {
                "-"
            } else {
                value
            }
        }
        fn branches(values: Option<&Vec<String>>) -> String {
            match values {
                Some(values) if !values.is_empty() => values.join(","),
                _ => "-".to_string(),
            }
        }

        let commit = self.commit.as_ref();
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.spread.markers(),
            self.path,
            field(commit.map(|c| c.sha.as_str()).unwrap_or("")),
            branches(commit.map(|c| &c.branches.local)),
            branches(commit.map(|c| &c.branches.remote)),
            field(commit.map(|c| c.host.as_str()).unwrap_or("")),
            field(commit.map(|c| c.author.as_str()).unwrap_or("")),
        )
    }
}

/// Outcome of one path in a claim batch
#[derive(Debug)]
pub enum ClaimStatus {
    /// The path is reserved for this clone
    Granted,
    /// Another record already covers the path
    Blocked(Box<TrackedCommit>),
    /// The file could not be made writable
    Unwritable(PathBuf),
}

impl ClaimStatus {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Outcome of one path in a release batch
#[derive(Debug)]
pub enum ReleaseStatus {
    /// The claim is gone
    Released,
    /// The file carries local edits; only a commit-and-update cycle
    /// clears the implicit claim
    ModifiedLocally(Box<TrackedCommit>),
}

impl ReleaseStatus {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }
}
