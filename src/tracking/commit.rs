//! The tracked-commit value object
//!
//! Every clone publishes a list of these records to the shared store. A
//! record is either a real Git commit projected with branch topology or a
//! synthetic "uncommitted" record (`sha == ""`) describing local edits and
//! claims that have no commit yet.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::GitProbe;
use crate::error::Result;

/// The `(host, user)` pair identifying one clone
///
/// Host comes from the OS hostname, user from the git `user.email` of the
/// managed repository (with the OS username as fallback). Stable across
/// process runs; this is the primary key for "mine" vs "someone else's".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub host: String,
    pub user: String,
}

impl Identity {
    /// Detect the identity for a managed repository
    pub async fn detect(probe: &GitProbe) -> Result<Self> {
        let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
        let user = match probe.user_email().await? {
            Some(email) if !email.is_empty() => email,
            _ => whoami::username(),
        };
        Ok(Self { host, user })
    }
}

/// Branch sets a commit is reachable on, from the publisher's point of view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branches {
    /// Local branch short names
    #[serde(default)]
    pub local: Vec<String>,
    /// Remote-tracking branch short names
    #[serde(default)]
    pub remote: Vec<String>,
}

/// One record published to the shared store
///
/// Field names are the wire format; unknown keys round-trip opaquely so
/// records written by newer versions survive a republish by this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedCommit {
    /// 40-char commit hash, or empty for an uncommitted record
    #[serde(default)]
    pub sha: String,
    /// Origin URL of the managed repository; scopes the record to one project
    pub remote: String,
    /// Branch reachability on the publisher's clone
    #[serde(default)]
    pub branches: Branches,
    /// Publisher hostname
    #[serde(default)]
    pub host: String,
    /// Commit author email, or the publisher's user for uncommitted records
    #[serde(default)]
    pub author: String,
    /// Committer date, or publish time for uncommitted records
    #[serde(default = "epoch")]
    pub date: DateTime<Utc>,
    /// Subject line (informational)
    #[serde(default)]
    pub summary: String,
    /// Repository-relative paths this record covers
    #[serde(default)]
    pub changes: Vec<String>,
    /// Paths claimed but not yet modified (uncommitted records only)
    #[serde(default)]
    pub claims: Vec<String>,
    /// Keys this version does not know about, passed through verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl TrackedCommit {
    /// Build a record for a real commit, filling branch sets from the probe
    pub async fn from_sha(
        probe: &GitProbe,
        remote_url: &str,
        host: &str,
        sha: &str,
    ) -> Result<Self> {
        let info = probe.commit(sha).await?;
        let (local, remote) = probe.branches_containing(sha).await?;
        Ok(Self {
            sha: sha.to_string(),
            remote: remote_url.to_string(),
            branches: Branches { local, remote },
            host: host.to_string(),
            author: info.author,
            date: info.date,
            summary: info.summary,
            changes: info.changes,
            claims: Vec::new(),
            extra: serde_json::Map::new(),
        })
    }

    /// Build the synthetic record for this clone's uncommitted state
    pub fn uncommitted(
        identity: &Identity,
        remote_url: &str,
        changes: Vec<String>,
        claims: Vec<String>,
    ) -> Self {
        Self {
            sha: String::new(),
            remote: remote_url.to_string(),
            branches: Branches::default(),
            host: identity.host.clone(),
            author: identity.user.clone(),
            date: Utc::now(),
            summary: "Uncommitted changes".to_string(),
            changes,
            claims,
            extra: serde_json::Map::new(),
        }
    }

    /// Whether this is a synthetic uncommitted record
    pub fn is_uncommitted(&self) -> bool {
        self.sha.is_empty()
    }

    /// Whether this record was published by the given identity
    pub fn is_mine(&self, identity: &Identity) -> bool {
        self.host == identity.host && self.author == identity.user
    }

    /// Whether the record covers a repository-relative path
    pub fn covers(&self, relative: &str) -> bool {
        let wanted = Path::new(relative);
        self.changes
            .iter()
            .any(|change| Path::new(change) == wanted)
    }

    /// Whether the record carries no information and should be dropped
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.claims.is_empty()
    }
}

/// Records agree on `(remote, sha, host, author)`; uncommitted records
/// (empty sha) compare by `(remote, host, author)` only. Opaque extras
/// never participate.
impl PartialEq for TrackedCommit {
    fn eq(&self, other: &Self) -> bool {
        self.remote == other.remote
            && self.sha == other.sha
            && self.host == other.host
            && self.author == other.author
    }
}

impl Eq for TrackedCommit {}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sha: &str, host: &str, author: &str) -> TrackedCommit {
        TrackedCommit {
            sha: sha.to_string(),
            remote: "git@example.com:team/project.git".to_string(),
            branches: Branches::default(),
            host: host.to_string(),
            author: author.to_string(),
            date: Utc::now(),
            summary: String::new(),
            changes: vec!["boss.png".to_string()],
            claims: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_equality_real_commit() {
        let a = record("a".repeat(40).as_str(), "ws-1", "amy@example.com");
        let mut b = a.clone();
        b.changes = vec!["other.png".to_string()];
        assert_eq!(a, b);

        let mut c = a.clone();
        c.sha = "b".repeat(40);
        assert_ne!(a, c);
    }

    #[test]
    fn test_equality_uncommitted_by_identity() {
        let a = record("", "ws-1", "amy@example.com");
        let mut b = a.clone();
        b.changes = vec![];
        b.claims = vec!["boss.png".to_string()];
        assert_eq!(a, b);

        let c = record("", "ws-2", "amy@example.com");
        assert_ne!(a, c);
    }

    #[test]
    fn test_serialization_round_trip() {
        let identity = Identity {
            host: "ws-1".to_string(),
            user: "amy@example.com".to_string(),
        };
        let record = TrackedCommit::uncommitted(
            &identity,
            "git@example.com:team/project.git",
            vec!["boss.png".to_string(), "title.wav".to_string()],
            vec!["title.wav".to_string()],
        );
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TrackedCommit = serde_json::from_str(&json).unwrap();
        assert_eq!(record, parsed);
        assert_eq!(record.changes, parsed.changes);
        assert_eq!(record.claims, parsed.claims);
        assert_eq!(record.date, parsed.date);
    }

    #[test]
    fn test_unknown_keys_round_trip() {
        let json = r#"{
            "sha": "",
            "remote": "git@example.com:team/project.git",
            "host": "ws-1",
            "author": "amy@example.com",
            "date": "2024-03-01T10:00:00Z",
            "changes": ["boss.png"],
            "claims": [],
            "review_url": "https://example.com/r/42"
        }"#;
        let parsed: TrackedCommit = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.extra.get("review_url").and_then(|v| v.as_str()),
            Some("https://example.com/r/42")
        );
        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(
            reserialized.get("review_url").and_then(|v| v.as_str()),
            Some("https://example.com/r/42")
        );
    }

    #[test]
    fn test_covers_normalizes_separators() {
        let record = record("", "ws-1", "amy@example.com");
        assert!(record.covers("boss.png"));
        assert!(!record.covers("art/boss.png"));
    }
}
