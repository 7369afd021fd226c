//! The `.gitalong.json` document
//!
//! A per-repository configuration file committed to the managed repository
//! so every clone coordinates against the same store with the same rules.
//! Defaults are layered under the file contents; unknown fields are ignored
//! so older binaries keep working against newer documents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Format, Json, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::git::has_tracked_extension;
use crate::store::RetryPolicy;

/// Basename of the configuration document at the managed repository root
pub const CONFIG_BASENAME: &str = ".gitalong.json";

/// Per-repository gitalong configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store locator: a Git remote or an HTTP JSON-document URL
    pub store_url: String,

    /// Extra headers for the JSON-document store (API keys); values
    /// starting with `$` are resolved from the environment at request time
    pub store_headers: BTreeMap<String, String>,

    /// Whether gitalong manages file permissions of tracked files
    pub modify_permissions: bool,

    /// File extensions gitalong coordinates (with or without leading dot)
    pub tracked_extensions: Vec<String>,

    /// Whether uncommitted changes are published to the store
    pub track_uncommitted: bool,

    /// Seconds between store refreshes; fetches inside this window are skipped
    pub pull_threshold: f64,

    /// Write retry budget before a store conflict is surfaced
    pub store_retries: u64,

    /// HTTP timeout in seconds for the JSON-document store
    pub store_timeout: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: String::new(),
            store_headers: BTreeMap::new(),
            modify_permissions: false,
            tracked_extensions: Vec::new(),
            track_uncommitted: false,
            pull_threshold: 60.0,
            store_retries: 5,
            store_timeout: 30.0,
        }
    }
}

impl Config {
    /// Path of the configuration document for a managed repository
    pub fn path(root: &Path) -> PathBuf {
        root.join(CONFIG_BASENAME)
    }

    /// Load and validate the configuration of a managed repository
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Err(ConfigError::NotSetUp(path).into());
        }

        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Json::file(&path))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Write the configuration document to a managed repository root
    pub fn save(&self, root: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        std::fs::write(Self::path(root), content + "\n")
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        Ok(())
    }

    /// Validate field values
    pub fn validate(&self) -> Result<()> {
        if self.store_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "store_url".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if !self.pull_threshold.is_finite() || self.pull_threshold < 0.0 {
            return Err(ConfigError::Invalid {
                field: "pull_threshold".to_string(),
                reason: "must be a non-negative number of seconds".to_string(),
            }
            .into());
        }
        if self.store_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "store_retries".to_string(),
                reason: "must allow at least one attempt".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Whether gitalong coordinates the given path
    pub fn tracks(&self, path: &str) -> bool {
        has_tracked_extension(path, &self.tracked_extensions)
    }

    /// Pull debounce window
    pub fn pull_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.pull_threshold)
    }

    /// HTTP timeout for the JSON-document store
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.store_timeout)
    }

    /// Store write retry discipline
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.store_retries,
            ..RetryPolicy::default()
        }
    }
}
