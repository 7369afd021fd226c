//! Read-only queries over the managed repository
//!
//! Wraps [`GitExecutor`] with the handful of questions gitalong asks git:
//! branch topology, remote URL, commit metadata, and working-tree changes.
//! File permission toggles live here too since they are applied to paths
//! the probe reports.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::instrument;

use super::executor::{split_lines, GitExecutor};
use crate::error::{Error, GitError, Result};

/// Metadata of one real commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    /// Subject line
    pub summary: String,
    /// Author email
    pub author: String,
    /// Committer date
    pub date: DateTime<Utc>,
    /// Paths changed versus the first parent (whole tree for a root commit)
    pub changes: Vec<String>,
}

/// Read-only git queries for one managed repository
#[derive(Debug, Clone)]
pub struct GitProbe {
    executor: GitExecutor,
}

impl GitProbe {
    /// Create a probe rooted at a known repository root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            executor: GitExecutor::new(root),
        }
    }

    /// Discover the repository containing `path` (searches parent directories)
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn discover(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let executor = GitExecutor::new(path);
        let top = executor
            .run(&["rev-parse", "--show-toplevel"])
            .await
            .map_err(|_| GitError::NotARepository(path.to_path_buf()))?;
        Ok(Self::new(PathBuf::from(top)))
    }

    /// The repository root
    pub fn root(&self) -> &Path {
        self.executor.root()
    }

    /// Shared access to the underlying executor
    pub fn executor(&self) -> &GitExecutor {
        &self.executor
    }

    /// Current branch name, or `None` for a detached HEAD
    pub async fn active_branch(&self) -> Result<Option<String>> {
        self.executor
            .run_ok(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await
    }

    /// Fetch URL of the origin remote
    pub async fn remote_url(&self) -> Result<String> {
        self.executor.run(&["remote", "get-url", "origin"]).await
    }

    /// Configured `user.email`, if any
    pub async fn user_email(&self) -> Result<Option<String>> {
        self.executor
            .run_ok(&["config", "--get", "user.email"])
            .await
    }

    /// Local branches as `(short name, tip sha)` pairs
    pub async fn local_branches(&self) -> Result<Vec<(String, String)>> {
        let lines = self
            .executor
            .run_lines(&[
                "for-each-ref",
                "refs/heads",
                "--format=%(objectname) %(refname:short)",
            ])
            .await?;
        Ok(parse_ref_lines(&lines))
    }

    /// Remote-tracking branches as `(short name, tip sha)` pairs
    ///
    /// Names are normalized to the branch name on the remote; the symbolic
    /// `origin/HEAD` entry is skipped.
    pub async fn remote_branches(&self) -> Result<Vec<(String, String)>> {
        let lines = self
            .executor
            .run_lines(&[
                "for-each-ref",
                "refs/remotes",
                "--format=%(objectname) %(refname)",
            ])
            .await?;
        let mut branches = Vec::new();
        for line in lines {
            let Some((sha, refname)) = line.split_once(' ') else {
                continue;
            };
            if let Some(name) = normalize_remote_ref(refname) {
                branches.push((name, sha.to_string()));
            }
        }
        Ok(branches)
    }

    /// Branches reachable to `sha`, split into local and remote-tracking sets
    pub async fn branches_containing(&self, sha: &str) -> Result<(Vec<String>, Vec<String>)> {
        let local = self
            .executor
            .run_ok(&[
                "for-each-ref",
                "refs/heads",
                "--contains",
                sha,
                "--format=%(refname:short)",
            ])
            .await?
            .map(|out| split_lines(&out))
            .unwrap_or_default();

        let remote = self
            .executor
            .run_ok(&[
                "for-each-ref",
                "refs/remotes",
                "--contains",
                sha,
                "--format=%(refname)",
            ])
            .await?
            .map(|out| {
                split_lines(&out)
                    .iter()
                    .filter_map(|refname| normalize_remote_ref(refname))
                    .collect()
            })
            .unwrap_or_default();

        Ok((dedup_sorted(local), dedup_sorted(remote)))
    }

    /// Summary, author email, committer date, and changed paths of a commit
    pub async fn commit(&self, sha: &str) -> Result<CommitInfo> {
        let raw = self
            .executor
            .run(&["show", "-s", "--format=%s%n%ae%n%cI", sha])
            .await?;
        let mut lines = raw.splitn(3, '\n');
        let summary = lines.next().unwrap_or_default().to_string();
        let author = lines.next().unwrap_or_default().to_string();
        let date = lines.next().unwrap_or_default();
        let date = DateTime::parse_from_rfc3339(date.trim())
            .map_err(|e| GitError::ParseError(format!("commit date for {sha}: {e}")))?
            .with_timezone(&Utc);

        let parent = format!("{sha}^");
        let changes = match self
            .executor
            .run_ok(&["rev-parse", "--verify", "--quiet", &parent])
            .await?
        {
            Some(_) => {
                self.executor
                    .run_lines(&[
                        "diff-tree",
                        "--no-commit-id",
                        "--name-only",
                        "-r",
                        &parent,
                        sha,
                    ])
                    .await?
            }
            // A root commit has no parent; every file in its tree counts.
            None => {
                self.executor
                    .run_lines(&["ls-tree", "-r", "--name-only", sha])
                    .await?
            }
        };

        Ok(CommitInfo {
            summary,
            author,
            date,
            changes,
        })
    }

    /// Working-tree changes filtered by tracked extensions
    ///
    /// Union of unstaged changes against HEAD, staged changes, and untracked
    /// files, in that order.
    pub async fn working_changes(&self, extensions: &[String]) -> Result<Vec<String>> {
        let mut changes = Vec::new();
        for source in [
            self.executor.run_ok(&["diff", "--name-only", "HEAD"]).await?,
            self.executor
                .run_ok(&["diff", "--cached", "--name-only"])
                .await?,
            self.executor
                .run_ok(&["ls-files", "--others", "--exclude-standard"])
                .await?,
        ] {
            if let Some(out) = source {
                changes.extend(split_lines(&out));
            }
        }
        changes.retain(|path| has_tracked_extension(path, extensions));
        Ok(dedup_in_order(changes))
    }

    /// All working-tree files carrying a tracked extension
    ///
    /// Drives the permission pass: tracked files plus untracked files that
    /// are not ignored.
    pub async fn tracked_extension_files(&self, extensions: &[String]) -> Result<Vec<String>> {
        let mut files = self
            .executor
            .run_lines(&["ls-files", "--cached", "--others", "--exclude-standard"])
            .await?;
        files.retain(|path| has_tracked_extension(path, extensions));
        Ok(dedup_in_order(files))
    }

    /// Directory git hooks live in, honoring `core.hooksPath`
    pub async fn hooks_path(&self) -> Result<PathBuf> {
        let dir = match self
            .executor
            .run_ok(&["config", "--get", "core.hooksPath"])
            .await?
        {
            Some(configured) => PathBuf::from(configured),
            None => {
                let git_dir = self.executor.run(&["rev-parse", "--git-dir"]).await?;
                PathBuf::from(git_dir).join("hooks")
            }
        };
        if dir.is_absolute() {
            Ok(dir)
        } else {
            Ok(self.root().join(dir))
        }
    }

    /// Whether a repository-relative path exists on disk
    pub fn file_exists(&self, relative: &str) -> bool {
        self.root().join(relative).exists()
    }

    /// Whether a repository-relative path is writable by the owner
    pub fn is_writable(&self, relative: &str) -> bool {
        let path = self.root().join(relative);
        match fs::metadata(&path) {
            Ok(meta) => !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    /// Toggle the write permission of a repository-relative path
    ///
    /// Idempotent; a refused chmod surfaces as [`Error::PermissionDenied`].
    pub fn set_writable(&self, relative: &str, writable: bool) -> Result<()> {
        let path = self.root().join(relative);
        let meta = fs::metadata(&path).map_err(Error::Io)?;
        let mut permissions = meta.permissions();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = permissions.mode();
            let mode = if writable {
                mode | 0o200
            } else {
                mode & !0o222
            };
            permissions.set_mode(mode);
        }
        #[cfg(not(unix))]
        permissions.set_readonly(!writable);

        fs::set_permissions(&path, permissions).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                Error::PermissionDenied(path)
            } else {
                Error::Io(e)
            }
        })
    }
}

/// Strip `refs/remotes/<remote>/` down to the branch name on the remote
///
/// Returns `None` for the symbolic `HEAD` entry.
fn normalize_remote_ref(refname: &str) -> Option<String> {
    let rest = refname.strip_prefix("refs/remotes/")?;
    let (_, branch) = rest.split_once('/')?;
    if branch == "HEAD" || branch.is_empty() {
        return None;
    }
    Some(branch.to_string())
}

/// Parse `for-each-ref` output formatted as `<sha> <short name>`
fn parse_ref_lines(lines: &[String]) -> Vec<(String, String)> {
    lines
        .iter()
        .filter_map(|line| {
            let (sha, name) = line.split_once(' ')?;
            Some((name.to_string(), sha.to_string()))
        })
        .collect()
}

/// Whether a path carries one of the configured tracked extensions
pub fn has_tracked_extension(path: &str, extensions: &[String]) -> bool {
    let Some(extension) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|tracked| tracked.trim_start_matches('.').eq_ignore_ascii_case(extension))
}

fn dedup_sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values.dedup();
    values
}

fn dedup_in_order(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
