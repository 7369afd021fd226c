//! Repository setup
//!
//! Writes `.gitalong.json`, initializes the store, and optionally wires the
//! managed repository up: a `.gitignore` entry for the store directory and
//! hook scripts that republish on every history-changing operation. Hook
//! installation is non-destructive: gitalong owns a fenced section inside
//! each hook file and re-installation replaces only that section.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::git::GitProbe;
use crate::repository::Repository;
use crate::store::{Store, DATA_DIRNAME};

/// Hooks that trigger a republish of this clone's slice
pub const HOOK_NAMES: [&str; 4] = [
    "applypatch-msg",
    "post-checkout",
    "post-commit",
    "post-rewrite",
];

const SECTION_BEGIN: &str = "# >>> gitalong >>>";
const SECTION_END: &str = "# <<< gitalong <<<";
const HOOK_COMMAND: &str = r#"gitalong -C "$(git rev-parse --show-toplevel)" update"#;

/// Options for [`setup`]
#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub store_url: String,
    pub store_headers: BTreeMap<String, String>,
    pub modify_permissions: bool,
    pub tracked_extensions: Vec<String>,
    pub track_uncommitted: bool,
    pub pull_threshold: f64,
    pub update_gitignore: bool,
    pub update_hooks: bool,
}

/// Set up gitalong on the repository containing `path`
///
/// Fails with `AlreadySetUp` when a configuration document exists.
#[instrument(skip_all, fields(store_url = %options.store_url))]
pub async fn setup(path: impl AsRef<Path>, options: SetupOptions) -> Result<Repository> {
    let probe = GitProbe::discover(path).await?;
    let root = probe.root().to_path_buf();

    let config_path = Config::path(&root);
    if config_path.exists() {
        return Err(ConfigError::AlreadySetUp(config_path).into());
    }

    let config = Config {
        store_url: options.store_url,
        store_headers: options.store_headers,
        modify_permissions: options.modify_permissions,
        tracked_extensions: options.tracked_extensions,
        track_uncommitted: options.track_uncommitted,
        pull_threshold: options.pull_threshold,
        ..Config::default()
    };
    config.save(&root)?;
    info!("wrote {}", config_path.display());

    // Clones the Git store / creates the cache directory up-front so the
    // first update does not pay for it under the lock.
    Store::open(&root, &config).await?;

    if options.update_gitignore {
        ensure_gitignore_entry(&root)?;
    }
    if options.update_hooks {
        install_hooks(&probe).await?;
    }

    Repository::find(&root).await
}

/// Append the store directory to `.gitignore` unless already ignored
fn ensure_gitignore_entry(root: &Path) -> Result<()> {
    let entry = format!("{DATA_DIRNAME}/");
    let gitignore = root.join(".gitignore");
    let existing = if gitignore.exists() {
        fs::read_to_string(&gitignore)?
    } else {
        String::new()
    };

    if existing
        .lines()
        .any(|line| line.trim() == entry || line.trim() == DATA_DIRNAME)
    {
        return Ok(());
    }

    let mut next = existing;
    if !next.is_empty() && !next.ends_with('\n') {
        next.push('\n');
    }
    next.push_str(&entry);
    next.push('\n');
    fs::write(&gitignore, next)?;
    debug!("added {} to {}", entry, gitignore.display());
    Ok(())
}

/// Install the gitalong section into every hook, creating files as needed
async fn install_hooks(probe: &GitProbe) -> Result<()> {
    let hooks_dir = probe.hooks_path().await?;
    fs::create_dir_all(&hooks_dir)?;

    for name in HOOK_NAMES {
        let path = hooks_dir.join(name);
        let existing = if path.exists() {
            fs::read_to_string(&path)?
        } else {
            String::new()
        };
        let updated = splice_section(&existing);
        fs::write(&path, updated)?;
        make_executable(&path)?;
        debug!("installed hook {}", path.display());
    }
    Ok(())
}

/// Replace the fenced gitalong section, or append one
///
/// Pre-existing hook content outside the fence is left untouched, so
/// re-running setup is idempotent and never clobbers other tools.
fn splice_section(existing: &str) -> String {
    let section = format!("{SECTION_BEGIN}\n{HOOK_COMMAND}\n{SECTION_END}\n");

    if existing.is_empty() {
        return format!("#!/bin/sh\n{section}");
    }

    match (existing.find(SECTION_BEGIN), existing.find(SECTION_END)) {
        (Some(begin), Some(end)) if begin < end => {
            let after = existing[end + SECTION_END.len()..].trim_start_matches('\n');
            format!("{}{}{}", &existing[..begin], section, after)
        }
        _ => {
            let mut next = existing.to_string();
            if !next.ends_with('\n') {
                next.push('\n');
            }
            next.push_str(&section);
            next
        }
    }
}

fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
