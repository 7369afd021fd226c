//! JSON-document store
//!
//! The store is a single HTTP-accessible JSON document: `snapshot` is a
//! GET, `commit` a PUT of the merged array. There is no cross-clone lock;
//! the backend relies on optimistic retry plus the invariant that each
//! clone only rewrites its own records. Reads are cached on disk and
//! debounced by `pull_threshold`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use super::{merge_records, modified_within, RetryPolicy, DATA_DIRNAME};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::tracking::{Identity, TrackedCommit};
use crate::{APP_NAME, VERSION};

/// Basename of the local read cache
const CACHE_BASENAME: &str = "store.json";

/// Store backed by a hosted JSON document
#[derive(Debug)]
pub struct HttpStore {
    url: String,
    headers: BTreeMap<String, String>,
    dir: PathBuf,
    client: reqwest::Client,
    pull_threshold: Duration,
    retry: RetryPolicy,
}

impl HttpStore {
    /// Create the store client and its cache directory
    pub fn new(managed_root: &Path, config: &Config) -> Result<Self> {
        let dir = managed_root.join(DATA_DIRNAME);
        std::fs::create_dir_all(&dir)?;

        let client = reqwest::Client::builder()
            .timeout(config.store_timeout())
            .user_agent(format!("{APP_NAME}/{VERSION}"))
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self {
            url: config.store_url.clone(),
            headers: config.store_headers.clone(),
            dir,
            client,
            pull_threshold: config.pull_threshold(),
            retry: config.retry_policy(),
        })
    }

    /// Directory holding store state under the managed root
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_BASENAME)
    }

    /// Headers with `$NAME` values resolved from the environment
    fn request_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(key, value)| (key.clone(), expand_header_value(value)))
            .collect()
    }

    async fn fetch_document(&self) -> Result<Vec<TrackedCommit>> {
        let mut request = self.client.get(&self.url);
        for (key, value) in self.request_headers() {
            request = request.header(key.as_str(), value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            ))
            .into());
        }
        let document: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StoreError::MalformedDocument(e.to_string()))?;
        parse_document(document)
    }

    fn read_cache(&self) -> Result<Vec<TrackedCommit>> {
        let content = std::fs::read_to_string(self.cache_path())?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::MalformedDocument(e.to_string()).into())
    }

    fn write_cache(&self, records: &[TrackedCommit]) -> Result<()> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::MalformedDocument(e.to_string()))?;
        std::fs::write(self.cache_path(), content + "\n")?;
        Ok(())
    }

    /// Read all records, served from the cache inside the debounce window
    pub async fn snapshot(&self) -> Result<Vec<TrackedCommit>> {
        if modified_within(&self.cache_path(), self.pull_threshold) {
            if let Ok(records) = self.read_cache() {
                debug!("serving store snapshot from cache");
                return Ok(records);
            }
        }
        let records = self.fetch_document().await?;
        self.write_cache(&records)?;
        Ok(records)
    }

    /// Publish a clone's slice merged with the observed document
    #[instrument(skip_all)]
    pub async fn commit(
        &self,
        identity: &Identity,
        remote_url: &str,
        slice: Vec<TrackedCommit>,
    ) -> Result<Vec<TrackedCommit>> {
        let mut attempt = 0u64;
        loop {
            // Re-observe each attempt so concurrent writers' records survive.
            let observed = self.fetch_document().await?;
            let merged = merge_records(observed, identity, remote_url, slice.clone());

            let mut request = self.client.put(&self.url).json(&merged);
            for (key, value) in self.request_headers() {
                request = request.header(key.as_str(), value);
            }
            let response = request
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                self.write_cache(&merged)?;
                return Ok(merged);
            }
            if is_conflict(status) {
                attempt += 1;
                if attempt >= self.retry.attempts {
                    return Err(StoreError::Conflict { attempts: attempt }.into());
                }
                debug!("store PUT returned {}, retry {}", status, attempt);
                tokio::time::sleep(self.retry.backoff(attempt)).await;
                continue;
            }
            return Err(StoreError::Unavailable(format!(
                "PUT {} returned {}",
                self.url, status
            ))
            .into());
        }
    }
}

/// Conflict-shaped statuses worth retrying
fn is_conflict(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::CONFLICT
            | StatusCode::PRECONDITION_FAILED
            | StatusCode::LOCKED
            | StatusCode::TOO_MANY_REQUESTS
    )
}

/// Accept a bare array or a `{"record": [...]}` wrapper
///
/// Hosted JSON services wrap the stored document in an envelope.
fn parse_document(value: serde_json::Value) -> Result<Vec<TrackedCommit>> {
    let array = match value {
        serde_json::Value::Array(array) => serde_json::Value::Array(array),
        serde_json::Value::Object(mut object) => match object.remove("record") {
            Some(record @ serde_json::Value::Array(_)) => record,
            _ => {
                return Err(StoreError::MalformedDocument(
                    "expected an array or a {\"record\": [...]} wrapper".to_string(),
                )
                .into())
            }
        },
        _ => {
            return Err(StoreError::MalformedDocument(
                "expected a JSON array at the store root".to_string(),
            )
            .into())
        }
    };
    serde_json::from_value(array)
        .map_err(|e| StoreError::MalformedDocument(e.to_string()).into())
}

/// Resolve `$NAME` header values from the environment at request time
fn expand_header_value(value: &str) -> String {
    let Some(name) = value.strip_prefix('$') else {
        return value.to_string();
    };
    match std::env::var(name) {
        Ok(resolved) => resolved,
        Err(_) => {
            warn!("environment variable {} for store header is unset", name);
            value.to_string()
        }
    }
}
