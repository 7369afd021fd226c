//! Integration tests for gitalong
//!
//! These tests require git to be installed and drive real repositories:
//! a bare "managed" remote, one or two clones, and a bare store remote,
//! all isolated inside temp directories.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use gitalong::repository::{ClaimStatus, ReleaseStatus};
use gitalong::setup::{setup, SetupOptions};
use gitalong::{Repository, TrackedCommit};

/// Run a git command in `dir`, asserting success
async fn git(dir: &Path, args: &[&str]) -> String {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .await
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

async fn write_file(dir: &Path, name: &str, content: &str) {
    tokio::fs::write(dir.join(name), content).await.unwrap();
}

/// A bare managed remote plus a bare store remote
struct Fixture {
    temp: TempDir,
    managed_remote: PathBuf,
    store_remote: PathBuf,
}

impl Fixture {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let managed_remote = temp.path().join("managed.git");
        let store_remote = temp.path().join("store.git");

        for remote in [&managed_remote, &store_remote] {
            tokio::fs::create_dir_all(remote).await.unwrap();
            git(remote, &["init", "--bare"]).await;
            git(remote, &["symbolic-ref", "HEAD", "refs/heads/master"]).await;
        }

        Self {
            temp,
            managed_remote,
            store_remote,
        }
    }

    /// Clone the managed remote and configure a committer identity
    async fn clone(&self, name: &str, email: &str) -> PathBuf {
        let clone_path = self.temp.path().join(name);
        git(
            self.temp.path(),
            &[
                "clone",
                self.managed_remote.to_str().unwrap(),
                clone_path.to_str().unwrap(),
            ],
        )
        .await;
        git(&clone_path, &["symbolic-ref", "HEAD", "refs/heads/master"]).await;
        git(&clone_path, &["config", "user.email", email]).await;
        git(&clone_path, &["config", "user.name", email]).await;
        clone_path
    }

    /// First clone with an initial pushed commit
    async fn primary_clone(&self) -> PathBuf {
        let clone_path = self.clone("alice", "alice@example.com").await;
        write_file(&clone_path, "README.md", "# Test repository\n").await;
        git(&clone_path, &["add", "README.md"]).await;
        git(&clone_path, &["commit", "-m", "Initial commit"]).await;
        git(&clone_path, &["push", "-u", "origin", "master"]).await;
        clone_path
    }

    fn options(&self) -> SetupOptions {
        SetupOptions {
            store_url: self.store_remote.to_string_lossy().to_string(),
            tracked_extensions: vec![".jpg".into(), ".gif".into(), ".png".into()],
            track_uncommitted: true,
            // No debounce so every snapshot observes the latest store state.
            pull_threshold: 0.0,
            ..SetupOptions::default()
        }
    }
}

/// Read the raw store document out of a clone's store directory
async fn store_document(clone: &Path) -> Vec<TrackedCommit> {
    let content = tokio::fs::read_to_string(clone.join(".gitalong/store.json"))
        .await
        .unwrap();
    serde_json::from_str(&content).unwrap()
}

#[tokio::test]
async fn test_setup_writes_config_and_clones_store() {
    let fixture = Fixture::new().await;
    let clone = fixture.primary_clone().await;

    let repository = setup(&clone, fixture.options()).await.unwrap();
    assert!(clone.join(".gitalong.json").exists());
    assert!(clone.join(".gitalong/.git").exists());
    assert!(repository.config().track_uncommitted);

    // A second setup must refuse to clobber the configuration.
    let err = setup(&clone, fixture.options()).await.unwrap_err();
    assert_eq!(err.kind(), "AlreadySetUp");
}

#[tokio::test]
async fn test_setup_updates_gitignore_and_hooks() {
    let fixture = Fixture::new().await;
    let clone = fixture.primary_clone().await;

    let options = SetupOptions {
        update_gitignore: true,
        update_hooks: true,
        ..fixture.options()
    };
    setup(&clone, options).await.unwrap();

    let gitignore = tokio::fs::read_to_string(clone.join(".gitignore"))
        .await
        .unwrap();
    assert!(gitignore.lines().any(|line| line == ".gitalong/"));

    for hook in ["applypatch-msg", "post-checkout", "post-commit", "post-rewrite"] {
        let content = tokio::fs::read_to_string(clone.join(".git/hooks").join(hook))
            .await
            .unwrap();
        assert!(content.contains("# >>> gitalong >>>"), "{hook} missing section");
        assert!(content.contains("gitalong -C"), "{hook} missing command");
    }
}

/// Spread scenarios: a pushed commit on a non-active branch, a local-only
/// commit on the active branch, an uncommitted tracked file, and a file
/// whose extension is not tracked.
#[tokio::test]
async fn test_spread_scenarios() {
    let fixture = Fixture::new().await;
    let clone = fixture.primary_clone().await;

    // remote.jpg is committed to master and pushed...
    write_file(&clone, "remote.jpg", "jpg").await;
    git(&clone, &["add", "remote.jpg"]).await;
    git(&clone, &["commit", "-m", "Add remote.jpg"]).await;
    git(&clone, &["push", "origin", "master"]).await;

    // ...while the clone works on a sibling branched before that commit.
    git(&clone, &["checkout", "-b", "work", "master^"]).await;
    write_file(&clone, "local.gif", "gif").await;
    git(&clone, &["add", "local.gif"]).await;
    git(&clone, &["commit", "-m", "Add local.gif"]).await;

    write_file(&clone, "uncommitted.png", "png").await;
    write_file(&clone, "untracked.txt", "txt").await;

    let repository = setup(&clone, fixture.options()).await.unwrap();
    repository.update().await.unwrap();

    let statuses = repository
        .statuses(&[
            "remote.jpg".to_string(),
            "local.gif".to_string(),
            "uncommitted.png".to_string(),
            "untracked.txt".to_string(),
        ])
        .await
        .unwrap();

    assert_eq!(statuses[0].spread.markers(), "--+-+---");
    let remote_commit = statuses[0].commit.as_ref().unwrap();
    assert_eq!(remote_commit.sha.len(), 40);

    assert_eq!(statuses[1].spread.markers(), "-+------");
    assert_eq!(statuses[1].commit.as_ref().unwrap().branches.local, ["work"]);

    assert_eq!(statuses[2].spread.markers(), "+-------");
    assert!(statuses[2].commit.as_ref().unwrap().sha.is_empty());

    assert_eq!(statuses[3].spread.markers(), "--------");
    assert!(statuses[3].commit.is_none());
}

/// Clone A advertises an uncommitted edit; clone B's claim must fail and
/// return A's record.
#[tokio::test]
async fn test_claim_conflict_across_clones() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;

    write_file(&alice, "a.png", "png").await;
    let repo_a = setup(&alice, fixture.options()).await.unwrap();
    repo_a.update().await.unwrap();

    let bob = fixture.clone("bob", "bob@example.com").await;
    let repo_b = setup(&bob, fixture.options()).await.unwrap();

    let statuses = repo_b.claim(&["a.png".to_string()]).await.unwrap();
    assert_eq!(statuses.len(), 1);
    match &statuses[0] {
        ClaimStatus::Blocked(record) => {
            assert!(record.is_uncommitted());
            assert_eq!(record.author, "alice@example.com");
            assert!(record.changes.contains(&"a.png".to_string()));
        }
        other => panic!("expected a blocked claim, got {other:?}"),
    }
}

/// A successful claim is visible to other clones, survives until the
/// claimant edits, and disappears after commit-push-update.
#[tokio::test]
async fn test_claim_edit_commit_lifecycle() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo_a = setup(&alice, fixture.options()).await.unwrap();

    let statuses = repo_a.claim(&["b.png".to_string()]).await.unwrap();
    assert!(statuses[0].is_granted());

    // The claim reached the store: every other clone sees it immediately.
    let bob = fixture.clone("bob", "bob@example.com").await;
    let repo_b = setup(&bob, fixture.options()).await.unwrap();
    let seen = repo_b.last_commit("b.png").await.unwrap().unwrap();
    assert!(seen.is_uncommitted());
    assert_eq!(seen.author, "alice@example.com");
    assert!(seen.claims.contains(&"b.png".to_string()));

    // Editing the file graduates the claim into a plain change.
    write_file(&alice, "b.png", "painted").await;
    repo_a.update().await.unwrap();
    let record = repo_a.last_commit("b.png").await.unwrap().unwrap();
    assert!(record.is_uncommitted());
    assert!(record.changes.contains(&"b.png".to_string()));
    assert!(!record.claims.contains(&"b.png".to_string()));

    // Commit and push; the next update drops the uncommitted record and
    // the branch-tip record takes over.
    git(&alice, &["add", "b.png"]).await;
    git(&alice, &["commit", "-m", "Add b.png"]).await;
    git(&alice, &["push", "origin", "master"]).await;
    repo_a.update().await.unwrap();

    let record = repo_a.last_commit("b.png").await.unwrap().unwrap();
    assert!(!record.is_uncommitted());
    assert!(record.claims.is_empty());

    let document = store_document(&alice).await;
    assert!(
        !document
            .iter()
            .any(|r| r.is_uncommitted() && r.author == "alice@example.com"),
        "uncommitted record should be gone after everything is committed"
    );
}

#[tokio::test]
async fn test_release_claims() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo = setup(&alice, fixture.options()).await.unwrap();

    // A clean claim releases fine.
    let claimed = repo.claim(&["r.png".to_string()]).await.unwrap();
    assert!(claimed[0].is_granted());
    let released = repo.release(&["r.png".to_string()]).await.unwrap();
    assert!(released[0].is_released());
    assert!(repo.last_commit("r.png").await.unwrap().is_none());

    // A locally modified file refuses to release.
    write_file(&alice, "s.png", "png").await;
    repo.update().await.unwrap();
    let released = repo.release(&["s.png".to_string()]).await.unwrap();
    match &released[0] {
        ReleaseStatus::ModifiedLocally(record) => {
            assert!(record.changes.contains(&"s.png".to_string()));
        }
        other => panic!("expected a refused release, got {other:?}"),
    }
}

/// Two consecutive updates with no intervening changes must leave the
/// store byte-identical.
#[tokio::test]
async fn test_update_is_idempotent() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo = setup(&alice, fixture.options()).await.unwrap();

    write_file(&alice, "x.png", "png").await;
    repo.update().await.unwrap();
    let first = tokio::fs::read_to_string(alice.join(".gitalong/store.json"))
        .await
        .unwrap();

    repo.update().await.unwrap();
    let second = tokio::fs::read_to_string(alice.join(".gitalong/store.json"))
        .await
        .unwrap();
    assert_eq!(first, second);

    // Removing the only change empties and removes the uncommitted record.
    tokio::fs::remove_file(alice.join("x.png")).await.unwrap();
    repo.update().await.unwrap();
    let document = store_document(&alice).await;
    assert!(!document.iter().any(|r| r.is_uncommitted()));
}

/// At most one uncommitted record per identity, however many updates run.
#[tokio::test]
async fn test_single_uncommitted_record_per_identity() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo = setup(&alice, fixture.options()).await.unwrap();

    write_file(&alice, "one.png", "png").await;
    repo.update().await.unwrap();
    write_file(&alice, "two.png", "png").await;
    repo.update().await.unwrap();

    let document = store_document(&alice).await;
    let uncommitted: Vec<_> = document
        .iter()
        .filter(|r| r.is_uncommitted() && r.author == "alice@example.com")
        .collect();
    assert_eq!(uncommitted.len(), 1);
    assert!(uncommitted[0].changes.contains(&"one.png".to_string()));
    assert!(uncommitted[0].changes.contains(&"two.png".to_string()));
}

/// Concurrent publishers must not clobber each other's records.
#[tokio::test]
async fn test_two_clones_merge_without_clobbering() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo_a = setup(&alice, fixture.options()).await.unwrap();

    write_file(&alice, "a.png", "png").await;
    repo_a.update().await.unwrap();

    let bob = fixture.clone("bob", "bob@example.com").await;
    let repo_b = setup(&bob, fixture.options()).await.unwrap();
    write_file(&bob, "b.png", "png").await;
    repo_b.update().await.unwrap();

    // Alice republishes; Bob's record must survive her merge.
    repo_a.update().await.unwrap();
    let document = store_document(&alice).await;
    let authors: Vec<_> = document
        .iter()
        .filter(|r| r.is_uncommitted())
        .map(|r| r.author.as_str())
        .collect();
    assert!(authors.contains(&"alice@example.com"));
    assert!(authors.contains(&"bob@example.com"));
}

/// With permission management on, a file held by someone else goes
/// read-only while one's own files stay writable.
#[tokio::test]
async fn test_permission_pass() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;

    write_file(&alice, "shared.png", "png").await;
    git(&alice, &["add", "shared.png"]).await;
    git(&alice, &["commit", "-m", "Add shared.png"]).await;
    git(&alice, &["push", "origin", "master"]).await;

    let options = SetupOptions {
        modify_permissions: true,
        ..fixture.options()
    };
    let repo_a = setup(&alice, options.clone()).await.unwrap();
    repo_a.update().await.unwrap();

    let bob = fixture.clone("bob", "bob@example.com").await;
    let repo_b = setup(&bob, options).await.unwrap();
    repo_b.update().await.unwrap();

    let alice_writable = !tokio::fs::metadata(alice.join("shared.png"))
        .await
        .unwrap()
        .permissions()
        .readonly();
    let bob_writable = !tokio::fs::metadata(bob.join("shared.png"))
        .await
        .unwrap()
        .permissions()
        .readonly();
    assert!(alice_writable, "the author keeps write access");
    assert!(!bob_writable, "other clones get a read-only copy");
}

/// The status line format: spread markers, path, then dash-padded fields.
#[tokio::test]
async fn test_status_line_format() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo = setup(&alice, fixture.options()).await.unwrap();

    write_file(&alice, "uncommitted.png", "png").await;
    repo.update().await.unwrap();

    let statuses = repo
        .statuses(&["uncommitted.png".to_string()])
        .await
        .unwrap();
    let line = statuses[0].to_string();
    let fields: Vec<&str> = line.split(' ').collect();
    assert_eq!(fields.len(), 7);
    assert_eq!(fields[0], "+-------");
    assert_eq!(fields[1], "uncommitted.png");
    assert_eq!(fields[2], "-");
    assert_eq!(fields[6], "alice@example.com");
}

/// Reopening the repository later still sees the published state.
#[tokio::test]
async fn test_fresh_process_sees_published_state() {
    let fixture = Fixture::new().await;
    let alice = fixture.primary_clone().await;
    let repo = setup(&alice, fixture.options()).await.unwrap();

    write_file(&alice, "persisted.png", "png").await;
    repo.update().await.unwrap();
    drop(repo);

    let reopened = Repository::find(&alice).await.unwrap();
    let record = reopened.last_commit("persisted.png").await.unwrap().unwrap();
    assert!(record.is_uncommitted());
    assert!(record.changes.contains(&"persisted.png".to_string()));
}
