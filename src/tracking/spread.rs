//! Commit-spread classification
//!
//! Answers "where does this commit live across the fleet?" as a bitset:
//! on my clone (active branch, other branch, uncommitted), on the remote
//! (matching or other branch), or on someone else's clone.

use bitflags::bitflags;

use super::commit::{Identity, TrackedCommit};

bitflags! {
    /// Where a tracked commit lives across branches and clones
    ///
    /// Multiple bits combine; a commit pushed from my active branch is both
    /// `MINE_ACTIVE_BRANCH` and `REMOTE_MATCHING_BRANCH`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommitSpread: u8 {
        /// My clone's uncommitted changes
        const MINE_UNCOMMITTED = 1 << 0;
        /// On my clone's active branch
        const MINE_ACTIVE_BRANCH = 1 << 1;
        /// On another branch of my clone
        const MINE_OTHER_BRANCH = 1 << 2;
        /// On the remote branch matching my active branch
        const REMOTE_MATCHING_BRANCH = 1 << 3;
        /// On another remote branch
        const REMOTE_OTHER_BRANCH = 1 << 4;
        /// On a non-matching branch of someone else's clone
        const OTHER_OTHER_BRANCH = 1 << 5;
        /// On someone else's branch matching my active branch
        const OTHER_MATCHING_BRANCH = 1 << 6;
        /// Someone else's uncommitted changes
        const OTHER_UNCOMMITTED = 1 << 7;
    }
}

impl Default for CommitSpread {
    fn default() -> Self {
        Self::empty()
    }
}

impl CommitSpread {
    /// Classify a record against the local identity and active branch
    ///
    /// Pure function of its inputs. `active_branch` is `None` for a
    /// detached HEAD: the active-branch bits (1 and 3) stay unset and
    /// every branch counts as "other than active".
    pub fn classify(
        record: &TrackedCommit,
        identity: &Identity,
        active_branch: Option<&str>,
    ) -> Self {
        let mut spread = Self::empty();
        let mine_host = record.host == identity.host;
        let on_active = |branches: &[String]| {
            active_branch.is_some_and(|active| branches.iter().any(|b| b == active))
        };
        let beyond_active = |branches: &[String]| {
            branches
                .iter()
                .any(|b| active_branch.map_or(true, |active| b != active))
        };

        if record.is_uncommitted() {
            if record.is_mine(identity) {
                spread |= Self::MINE_UNCOMMITTED;
            } else {
                spread |= Self::OTHER_UNCOMMITTED;
            }
        }
        if mine_host && on_active(&record.branches.local) {
            spread |= Self::MINE_ACTIVE_BRANCH;
        }
        if mine_host && beyond_active(&record.branches.local) {
            spread |= Self::MINE_OTHER_BRANCH;
        }
        if on_active(&record.branches.remote) {
            spread |= Self::REMOTE_MATCHING_BRANCH;
        }
        if beyond_active(&record.branches.remote) {
            spread |= Self::REMOTE_OTHER_BRANCH;
        }
        if !mine_host && beyond_active(&record.branches.local) {
            spread |= Self::OTHER_OTHER_BRANCH;
        }
        if !mine_host && on_active(&record.branches.local) {
            spread |= Self::OTHER_MATCHING_BRANCH;
        }

        spread
    }

    /// Render the eight `+`/`-` markers in bit order
    pub fn markers(&self) -> String {
        (0..8)
            .map(|bit| {
                if self.bits() & (1 << bit) != 0 {
                    '+'
                } else {
                    '-'
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::Branches;
    use chrono::Utc;

    fn me() -> Identity {
        Identity {
            host: "ws-1".to_string(),
            user: "amy@example.com".to_string(),
        }
    }

    fn record(sha: &str, host: &str, author: &str, local: &[&str], remote: &[&str]) -> TrackedCommit {
        TrackedCommit {
            sha: sha.to_string(),
            remote: "git@example.com:team/project.git".to_string(),
            branches: Branches {
                local: local.iter().map(|s| s.to_string()).collect(),
                remote: remote.iter().map(|s| s.to_string()).collect(),
            },
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
    fn test_mine_uncommitted() {
        let r = record("", "ws-1", "amy@example.com", &[], &[]);
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert_eq!(spread, CommitSpread::MINE_UNCOMMITTED);
        assert_eq!(spread.markers(), "+-------");
    }

    #[test]
    fn test_other_uncommitted() {
        let r = record("", "ws-2", "bob@example.com", &[], &[]);
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert_eq!(spread, CommitSpread::OTHER_UNCOMMITTED);
        assert_eq!(spread.markers(), "-------+");
    }

    #[test]
    fn test_same_host_other_author_uncommitted_is_other() {
        let r = record("", "ws-1", "bob@example.com", &[], &[]);
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert!(spread.contains(CommitSpread::OTHER_UNCOMMITTED));
        assert!(!spread.contains(CommitSpread::MINE_UNCOMMITTED));
    }

    #[test]
    fn test_mine_active_and_remote_matching() {
        let sha = "a".repeat(40);
        let r = record(&sha, "ws-1", "amy@example.com", &["master"], &["master"]);
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert_eq!(
            spread,
            CommitSpread::MINE_ACTIVE_BRANCH | CommitSpread::REMOTE_MATCHING_BRANCH
        );
        assert_eq!(spread.markers(), "-+-+----");
    }

    #[test]
    fn test_mine_local_only_commit() {
        let sha = "a".repeat(40);
        let r = record(&sha, "ws-1", "amy@example.com", &["master"], &[]);
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert_eq!(spread, CommitSpread::MINE_ACTIVE_BRANCH);
        assert_eq!(spread.markers(), "-+------");
    }

    #[test]
    fn test_pushed_on_non_active_branch() {
        let sha = "a".repeat(40);
        let r = record(&sha, "ws-1", "amy@example.com", &["assets"], &["assets"]);
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert_eq!(
            spread,
            CommitSpread::MINE_OTHER_BRANCH | CommitSpread::REMOTE_OTHER_BRANCH
        );
        assert_eq!(spread.markers(), "--+-+---");
    }

    #[test]
    fn test_someone_elses_commit() {
        let sha = "a".repeat(40);
        let r = record(
            &sha,
            "ws-2",
            "bob@example.com",
            &["master", "wip"],
            &["master"],
        );
        let spread = CommitSpread::classify(&r, &me(), Some("master"));
        assert!(spread.contains(CommitSpread::OTHER_MATCHING_BRANCH));
        assert!(spread.contains(CommitSpread::OTHER_OTHER_BRANCH));
        assert!(spread.contains(CommitSpread::REMOTE_MATCHING_BRANCH));
        assert!(!spread.contains(CommitSpread::MINE_ACTIVE_BRANCH));
    }

    #[test]
    fn test_detached_head_unsets_active_bits() {
        let sha = "a".repeat(40);
        let r = record(&sha, "ws-1", "amy@example.com", &["master"], &["master"]);
        let spread = CommitSpread::classify(&r, &me(), None);
        assert_eq!(
            spread,
            CommitSpread::MINE_OTHER_BRANCH | CommitSpread::REMOTE_OTHER_BRANCH
        );
    }

    #[test]
    fn test_classify_is_pure() {
        let sha = "a".repeat(40);
        let r = record(&sha, "ws-1", "amy@example.com", &["master"], &["master"]);
        let first = CommitSpread::classify(&r, &me(), Some("master"));
        let second = CommitSpread::classify(&r, &me(), Some("master"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_markers_empty() {
        assert_eq!(CommitSpread::empty().markers(), "--------");
    }
}
