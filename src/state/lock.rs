//! Lock files guarding snapshot writes.
//!
//! The local backend serializes compare-and-swap writes across processes with
//! an exclusive lock file. A lock left behind by a crashed process expires and
//! can then be taken over, or removed explicitly with a force unlock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StateError;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Information about a held lock, stored as the lock file's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates lock info for `holder`, expiring after the default period.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        Self::with_ttl(holder, chrono::Duration::seconds(LOCK_EXPIRY_SECS))
    }

    /// Creates lock info expiring after `ttl`.
    #[must_use]
    pub fn with_ttl(holder: &str, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// An exclusive lock file.
///
/// Lock files are written to a private temporary file first and then linked
/// into place, so a lock file never exists without its full content.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    info: LockInfo,
}

impl FileLock {
    /// Creates the lock file at `path`, expiring after [`LOCK_EXPIRY_SECS`].
    ///
    /// # Errors
    ///
    /// See [`acquire_with_ttl`](Self::acquire_with_ttl).
    pub async fn acquire(path: &Path, holder: &str) -> Result<Self, StateError> {
        Self::acquire_with_ttl(path, holder, chrono::Duration::seconds(LOCK_EXPIRY_SECS)).await
    }

    /// Creates the lock file at `path`, expiring after `ttl`.
    ///
    /// An expired lock is taken over. A lock file that cannot be parsed is
    /// never taken over; it has to be removed with a force unlock.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockedByOther`] if a live lock exists, or
    /// [`StateError::LockFailed`] if the existing lock is unreadable or the
    /// file cannot be written.
    pub async fn acquire_with_ttl(path: &Path, holder: &str, ttl: chrono::Duration) -> Result<Self, StateError> {
        let info = LockInfo::with_ttl(holder, ttl);

        // One takeover attempt: a second collision means a live competitor.
        for _ in 0..2 {
            if write_exclusive(path, &info).await? {
                debug!("Acquired lock {} at {}", info.lock_id, path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    info,
                });
            }

            match read_lock(path).await {
                Ok(Some(existing)) if existing.is_expired() => {
                    warn!(
                        "Taking over lock {} of {} at {} (expired {})",
                        existing.lock_id,
                        existing.holder,
                        path.display(),
                        existing.expires_at.to_rfc3339()
                    );
                    remove_lock(path).await?;
                }
                Ok(Some(existing)) => {
                    return Err(StateError::LockedByOther {
                        holder: existing.holder,
                        since: existing.acquired_at.to_rfc3339(),
                    });
                }
                // Released between our attempt and the read.
                Ok(None) => {}
                Err(e) => {
                    return Err(StateError::LockFailed {
                        message: format!(
                            "existing lock at {} is unreadable ({e}); force unlock if no deployment is running",
                            path.display()
                        ),
                    });
                }
            }
        }

        Err(StateError::LockFailed {
            message: format!("lock at {} was re-created concurrently", path.display()),
        })
    }

    /// Keeps the lock file in place and returns its metadata.
    ///
    /// Release it later with [`release_lock`].
    #[must_use]
    pub fn into_info(self) -> LockInfo {
        self.info
    }

    /// Removes the lock file.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is no longer ours or cannot be removed.
    pub async fn release(self) -> Result<(), StateError> {
        release_lock(&self.path, &self.info).await
    }
}

/// Writes `info` to `path` unless a lock file already exists there.
///
/// Returns false if one does.
async fn write_exclusive(path: &Path, info: &LockInfo) -> Result<bool, StateError> {
    let content = serde_json::to_vec_pretty(info)
        .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
    let temp_path = path.with_extension(format!("{}.tmp", info.lock_id));

    let mut file = fs::File::create(&temp_path).await.map_err(lock_failed("create"))?;
    file.write_all(&content).await.map_err(lock_failed("write"))?;
    file.sync_all().await.map_err(lock_failed("sync"))?;
    drop(file);

    let linked = fs::hard_link(&temp_path, path).await;
    let _ = fs::remove_file(&temp_path).await;

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(lock_failed("create")(e)),
    }
}

/// Removes the lock file at `path` if it still holds `lock`.
///
/// # Errors
///
/// Returns [`StateError::LockFailed`] if another lock replaced it or the file
/// cannot be removed.
pub async fn release_lock(path: &Path, lock: &LockInfo) -> Result<(), StateError> {
    match read_lock(path).await? {
        Some(current) if current.lock_id == lock.lock_id => {
            remove_lock(path).await?;
            debug!("Released lock {}", lock.lock_id);
            Ok(())
        }
        Some(current) => Err(StateError::LockFailed {
            message: format!(
                "lock {} at {} was taken over by {}",
                lock.lock_id,
                path.display(),
                current.holder
            ),
        }),
        None => {
            warn!("Lock {} at {} was already removed", lock.lock_id, path.display());
            Ok(())
        }
    }
}

/// Reads the lock file at `path`, if any.
///
/// # Errors
///
/// Returns [`StateError::Corrupted`] if the file exists but is unreadable.
pub async fn read_lock(path: &Path) -> Result<Option<LockInfo>, StateError> {
    let content = match fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::corrupted(format!("Failed to read lock file: {e}"))),
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))
}

/// Removes the lock file at `path`, returning whether one existed.
///
/// # Errors
///
/// Returns [`StateError::LockFailed`] if the file exists but cannot be removed.
pub async fn remove_lock(path: &Path) -> Result<bool, StateError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(lock_failed("delete")(e)),
    }
}

fn lock_failed(action: &'static str) -> impl Fn(std::io::Error) -> StateError {
    move |e| StateError::LockFailed {
        message: format!("Failed to {action} lock file: {e}"),
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
