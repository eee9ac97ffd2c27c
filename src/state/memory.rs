//! In-memory snapshot backend, for tests and previews.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{Result, StateError};
use crate::resource::StackRef;

use super::backend::{Precondition, SnapshotBackend, VersionedBlob};
use super::lock::LockInfo;

/// Snapshot backend keeping blobs in process memory.
///
/// Versions are a counter shared by every stack, so each write is distinct.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<StackRef, VersionedBlob>,
    locks: HashMap<StackRef, LockInfo>,
    next_version: u64,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotBackend for InMemoryBackend {
    async fn get(&self, stack: &StackRef) -> Result<Option<VersionedBlob>> {
        Ok(self.inner.lock().await.blobs.get(stack).cloned())
    }

    async fn put(&self, stack: &StackRef, data: Vec<u8>, precondition: Precondition) -> Result<String> {
        let mut inner = self.inner.lock().await;
        let current = inner.blobs.get(stack).map(|b| b.version.clone());

        if !precondition.holds(current.as_deref()) {
            return Err(StateError::WriteConflict {
                stack: stack.to_string(),
                expected: precondition.expected().to_string(),
                found: current.unwrap_or_else(|| String::from("<none>")),
            }
            .into());
        }

        inner.next_version += 1;
        let version = inner.next_version.to_string();
        inner.blobs.insert(
            stack.clone(),
            VersionedBlob {
                data,
                version: version.clone(),
            },
        );
        Ok(version)
    }

    async fn acquire_lock(&self, stack: &StackRef, holder: &str, ttl: chrono::Duration) -> Result<LockInfo> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.locks.get(stack) {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
        }

        let lock = LockInfo::with_ttl(holder, ttl);
        inner.locks.insert(stack.clone(), lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, stack: &StackRef, lock: &LockInfo) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(current) = inner.locks.get(stack) {
            if current.lock_id != lock.lock_id {
                return Err(StateError::LockFailed {
                    message: format!("lock {} on {stack} was taken over by {}", lock.lock_id, current.holder),
                }
                .into());
            }
        }
        inner.locks.remove(stack);
        Ok(())
    }

    async fn lock_info(&self, stack: &StackRef) -> Result<Option<LockInfo>> {
        Ok(self.inner.lock().await.locks.get(stack).cloned())
    }

    async fn force_unlock(&self, stack: &StackRef) -> Result<bool> {
        Ok(self.inner.lock().await.locks.remove(stack).is_some())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
