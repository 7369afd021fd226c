//! Cross-process store lock
//!
//! A lockfile with create-new semantics serializes store mutations between
//! concurrent gitalong processes on the same clone. The file carries the
//! owner's pid as JSON for post-mortem inspection; it is removed on drop.
//! Cross-clone writers are not serialized here - the store merge rule makes
//! their writes commute.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use crate::error::{Result, StoreError};

/// How long acquisition polls before giving up
pub const DEFAULT_LOCK_DEADLINE: Duration = Duration::from_secs(10);

/// Poll interval while the lock is held by another process
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize, Deserialize)]
struct LockMeta {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// RAII guard over the store lockfile
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    released: bool,
}

impl StoreLock {
    /// Acquire the lock at `path`, waiting up to the default deadline
    pub async fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        Self::acquire_with_deadline(path, DEFAULT_LOCK_DEADLINE).await
    }

    /// Acquire the lock at `path`, waiting up to `deadline`
    pub async fn acquire_with_deadline(
        path: impl Into<PathBuf>,
        deadline: Duration,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let started = std::time::Instant::now();
        loop {
            match Self::try_create(&path) {
                Ok(()) => {
                    return Ok(Self {
                        path,
                        released: false,
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= deadline {
                        return Err(StoreError::LockTimeout {
                            path,
                            waited: started.elapsed(),
                        }
                        .into());
                    }
                    sleep(POLL_INTERVAL).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn try_create(path: &Path) -> io::Result<()> {
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let meta = LockMeta {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        serde_json::to_writer(&file, &meta)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        file.sync_all()
    }

    /// The lockfile path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly
    pub fn release(mut self) -> Result<()> {
        if !self.released {
            fs::remove_file(&self.path)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!("failed to remove lockfile {}: {}", self.path.display(), err);
            }
        }
    }
}
