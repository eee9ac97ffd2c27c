//! The snapshot store: the single writer of a stack's durable record.
//!
//! Every write is a compare-and-swap against the version this store last
//! loaded or wrote for the stack, so a second deployment against the same
//! stack fails with a write conflict instead of silently overwriting. Writes
//! are serialized through an async mutex held across the backend call.
//!
//! A deployment additionally holds the stack's lock from before it loads the
//! snapshot until after it saves the final one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError};
use crate::resource::StackRef;

use super::backend::{Precondition, SnapshotBackend};
use super::lock::{generate_holder_id, LockInfo};
use super::types::{Snapshot, STATE_VERSION};

/// Stored form of a snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    format_version: String,
    serial: u64,
    checksum: String,
    snapshot: Snapshot,
}

/// What this store knows about a stack's stored blob.
#[derive(Debug, Clone, Default)]
struct Tracked {
    version: Option<String>,
    serial: u64,
}

/// Reads and writes snapshots through a [`SnapshotBackend`].
pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    holder: String,
    tracked: Mutex<HashMap<StackRef, Tracked>>,
    writes: AtomicU64,
}

impl SnapshotStore {
    /// Creates a store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn SnapshotBackend>) -> Self {
        Self {
            backend,
            holder: generate_holder_id(),
            tracked: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Returns the backend's type name.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    /// Returns the number of successful writes made by this store.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Loads the snapshot of `stack`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::NotFound`] if nothing is stored, or a
    /// corruption error if the stored blob fails verification.
    pub async fn load(&self, stack: &StackRef) -> Result<Snapshot> {
        self.read(stack).await?.ok_or_else(|| {
            StateError::NotFound {
                stack: stack.to_string(),
            }
            .into()
        })
    }

    /// Loads the snapshot of `stack`, or an empty one if none is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored blob cannot be read or verified.
    pub async fn load_or_empty(&self, stack: &StackRef) -> Result<Snapshot> {
        Ok(self.read(stack).await?.unwrap_or_else(|| {
            debug!("No snapshot for {stack}; starting empty");
            Snapshot::empty()
        }))
    }

    async fn read(&self, stack: &StackRef) -> Result<Option<Snapshot>> {
        let mut tracked = self.tracked.lock().await;
        let Some(blob) = self.backend.get(stack).await? else {
            tracked.insert(stack.clone(), Tracked::default());
            return Ok(None);
        };

        let envelope = decode(&blob.data)?;
        info!(
            "Loaded snapshot for {stack}: {} resources (serial {})",
            envelope.snapshot.resources.len(),
            envelope.serial
        );
        tracked.insert(
            stack.clone(),
            Tracked {
                version: Some(blob.version),
                serial: envelope.serial,
            },
        );
        Ok(Some(envelope.snapshot))
    }

    /// Persists a complete snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::WriteConflict`] if the stored snapshot changed
    /// since this store last read or wrote it, or a corruption error if the
    /// snapshot violates its ordering invariants.
    pub async fn save(&self, stack: &StackRef, snapshot: &Snapshot) -> Result<()> {
        let serial = self.write(stack, snapshot).await?;
        info!("Saved snapshot for {stack} (serial {serial})");
        Ok(())
    }

    /// Persists an intermediate snapshot during a deployment.
    ///
    /// Same guarantees as [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub async fn checkpoint(&self, stack: &StackRef, snapshot: &Snapshot) -> Result<()> {
        let serial = self.write(stack, snapshot).await?;
        debug!("Checkpointed {stack} (serial {serial})");
        Ok(())
    }

    async fn write(&self, stack: &StackRef, snapshot: &Snapshot) -> Result<u64> {
        snapshot.verify_integrity()?;

        let mut tracked = self.tracked.lock().await;
        let current = tracked.get(stack).cloned().unwrap_or_default();
        let serial = current.serial + 1;
        let data = encode(snapshot, serial)?;

        let version = self
            .backend
            .put(stack, data, Precondition::from_version(current.version))
            .await?;

        tracked.insert(
            stack.clone(),
            Tracked {
                version: Some(version),
                serial,
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(serial)
    }

    /// Takes the deployment lock on `stack`, expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockedByOther`] if another deployment holds a
    /// live lock, or a lock error if the lock cannot be written.
    pub async fn lock(&self, stack: &StackRef, ttl: Duration) -> Result<LockInfo> {
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| StateError::LockFailed {
            message: format!("Invalid lock duration: {e}"),
        })?;
        let lock = self.backend.acquire_lock(stack, &self.holder, ttl).await?;
        info!("Locked {stack} (lock {}, expires {})", lock.lock_id, lock.expires_at.to_rfc3339());
        Ok(lock)
    }

    /// Releases a lock taken with [`lock`](Self::lock).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockFailed`] if the lock was taken over or
    /// cannot be removed.
    pub async fn unlock(&self, stack: &StackRef, lock: &LockInfo) -> Result<()> {
        self.backend.release_lock(stack, lock).await?;
        debug!("Unlocked {stack} (lock {})", lock.lock_id);
        Ok(())
    }

    /// Returns the deployment lock currently held on `stack`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be read.
    pub async fn lock_info(&self, stack: &StackRef) -> Result<Option<LockInfo>> {
        self.backend.lock_info(stack).await
    }

    /// Removes locks left behind by a crashed deployment.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be removed.
    pub async fn force_unlock(&self, stack: &StackRef) -> Result<bool> {
        self.backend.force_unlock(stack).await
    }
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("backend", &self.backend.backend_type())
            .field("writes", &self.writes())
            .finish_non_exhaustive()
    }
}

fn checksum(snapshot: &Snapshot) -> Result<String> {
    let bytes = serde_json::to_vec(snapshot)
        .map_err(|e| StateError::serialization(format!("Failed to serialize snapshot: {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

fn encode(snapshot: &Snapshot, serial: u64) -> Result<Vec<u8>> {
    let envelope = Envelope {
        format_version: STATE_VERSION.to_string(),
        serial,
        checksum: checksum(snapshot)?,
        snapshot: snapshot.clone(),
    };
    Ok(serde_json::to_vec_pretty(&envelope)
        .map_err(|e| StateError::serialization(format!("Failed to serialize snapshot: {e}")))?)
}

fn decode(data: &[u8]) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_slice(data)
        .map_err(|e| StateError::corrupted(format!("Failed to parse snapshot: {e}")))?;

    if envelope.format_version != STATE_VERSION {
        return Err(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: envelope.format_version,
        }
        .into());
    }

    let actual = checksum(&envelope.snapshot)?;
    if actual != envelope.checksum {
        return Err(StateError::corrupted(format!(
            "checksum mismatch (recorded {}, computed {actual})",
            envelope.checksum
        ))
        .into());
    }

    envelope.snapshot.verify_integrity()?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvergeError;
    use crate::provider::PluginInfo;
    use crate::resource::ResourceState;
    use crate::state::backend::{MockSnapshotBackend, VersionedBlob};
    use crate::state::{InMemoryBackend, LocalBackend, Manifest};
    use serde_json::json;

    fn stack() -> StackRef {
        StackRef::new("web", "dev")
    }

    fn sample() -> Snapshot {
        let root = ResourceState::new(stack().root_urn().unwrap(), false);
        let mut bucket = ResourceState::new(
            stack().urn(None, "echo:index:Bucket", "assets").unwrap(),
            true,
        );
        bucket.id = Some(String::from("bucket-1"));
        bucket.parent = Some(root.urn.clone());
        bucket.inputs.insert(String::from("size"), json!(10));
        bucket.outputs.insert(String::from("arn"), json!("arn:bucket-1"));
        bucket.protect = true;

        let manifest = Manifest::new(vec![PluginInfo {
            name: String::from("echo"),
            version: String::from("1.0.0"),
        }]);
        Snapshot::new(manifest, vec![root, bucket])
    }

    fn memory_store() -> (SnapshotStore, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        (SnapshotStore::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(Arc::new(LocalBackend::with_base_dir(dir.path())));
        let snapshot = sample();

        store.load_or_empty(&stack()).await.unwrap();
        store.save(&stack(), &snapshot).await.unwrap();

        let fresh = SnapshotStore::new(Arc::new(LocalBackend::with_base_dir(dir.path())));
        assert_eq!(fresh.load(&stack()).await.unwrap(), snapshot);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_stack() {
        let (store, _) = memory_store();

        let err = store.load(&stack()).await.unwrap_err();
        assert!(matches!(err, ConvergeError::State(StateError::NotFound { .. })));

        let empty = store.load_or_empty(&stack()).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writer_conflicts() {
        let backend: Arc<InMemoryBackend> = Arc::new(InMemoryBackend::new());
        let first = SnapshotStore::new(backend.clone());
        let second = SnapshotStore::new(backend);

        first.load_or_empty(&stack()).await.unwrap();
        second.load_or_empty(&stack()).await.unwrap();

        first.save(&stack(), &sample()).await.unwrap();
        let err = second.save(&stack(), &sample()).await.unwrap_err();
        assert!(err.is_conflict());

        // The winner keeps writing against its own version.
        first.checkpoint(&stack(), &Snapshot::empty()).await.unwrap();
        assert_eq!(first.writes(), 2);
        assert_eq!(second.writes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_never_written() {
        let (store, backend) = memory_store();
        let mut snapshot = sample();
        snapshot.resources.reverse();

        let err = store.checkpoint(&stack(), &snapshot).await.unwrap_err();
        assert!(matches!(err, ConvergeError::State(StateError::Corrupted { .. })));
        assert!(backend.get(&stack()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_blob_is_corrupt() {
        let (store, backend) = memory_store();
        store.save(&stack(), &sample()).await.unwrap();

        let blob = backend.get(&stack()).await.unwrap().unwrap();
        let mut envelope: serde_json::Value = serde_json::from_slice(&blob.data).unwrap();
        envelope["snapshot"]["resources"][1]["id"] = json!("someone-else");
        backend
            .put(
                &stack(),
                serde_json::to_vec(&envelope).unwrap(),
                Precondition::MatchVersion(blob.version),
            )
            .await
            .unwrap();

        let err = store.load(&stack()).await.unwrap_err();
        assert!(matches!(err, ConvergeError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_format_version_mismatch() {
        let (store, backend) = memory_store();
        store.save(&stack(), &sample()).await.unwrap();

        let blob = backend.get(&stack()).await.unwrap().unwrap();
        let mut envelope: serde_json::Value = serde_json::from_slice(&blob.data).unwrap();
        envelope["format_version"] = json!("0");
        backend
            .put(
                &stack(),
                serde_json::to_vec(&envelope).unwrap(),
                Precondition::MatchVersion(blob.version),
            )
            .await
            .unwrap();

        let err = store.load(&stack()).await.unwrap_err();
        assert!(matches!(err, ConvergeError::State(StateError::VersionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mut backend = MockSnapshotBackend::new();
        backend.expect_get().returning(|_| Ok(None::<VersionedBlob>));
        backend
            .expect_put()
            .returning(|_, _, _| Err(StateError::backend("disk full").into()));
        let store = SnapshotStore::new(Arc::new(backend));

        store.load_or_empty(&stack()).await.unwrap();
        let err = store.save(&stack(), &sample()).await.unwrap_err();

        assert!(matches!(err, ConvergeError::State(StateError::Backend { .. })));
        assert_eq!(store.writes(), 0);
    }
}
