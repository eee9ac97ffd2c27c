//! Local file-based snapshot backend.
//!
//! Each stack is stored at `<dir>/stacks/<project>/<stack>.json`. The version
//! of a blob is the SHA-256 of its bytes, so a concurrent writer is detected
//! by rehashing the file under `<stack>.write.lock`. A running deployment
//! holds `<stack>.lock` for its whole duration.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ConvergeError, Result, StateError};
use crate::resource::StackRef;

use super::backend::{Precondition, SnapshotBackend, VersionedBlob};
use super::lock::{generate_holder_id, read_lock, release_lock, remove_lock, FileLock, LockInfo};

/// Default state directory name.
pub const STATE_DIR: &str = ".converge";

/// Subdirectory holding per-stack files.
const STACKS_DIR: &str = "stacks";

/// Local file-based snapshot backend.
#[derive(Debug)]
pub struct LocalBackend {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Identifier written into lock files.
    holder: String,
}

impl LocalBackend {
    /// Creates a backend rooted at `./.converge`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvergeError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a backend rooted at a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            holder: generate_holder_id(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the snapshot file path for `stack`.
    #[must_use]
    pub fn stack_path(&self, stack: &StackRef) -> PathBuf {
        self.base_dir
            .join(STACKS_DIR)
            .join(&stack.project)
            .join(format!("{}.json", stack.stack))
    }

    /// Deployment lock, held for a whole run.
    fn lock_path(&self, stack: &StackRef) -> PathBuf {
        self.stack_path(stack).with_extension("lock")
    }

    /// Write lock, held for one compare-and-swap.
    fn write_lock_path(&self, stack: &StackRef) -> PathBuf {
        self.stack_path(stack).with_extension("write.lock")
    }

    /// Ensures the directory holding `path` exists.
    async fn ensure_dir(path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!("Creating state directory: {}", dir.display());
                fs::create_dir_all(dir).await.map_err(|e| {
                    StateError::backend(format!("Failed to create state directory: {e}"))
                })?;
            }
        }
        Ok(())
    }

    async fn read_blob(path: &Path) -> Result<Option<VersionedBlob>> {
        match fs::read(path).await {
            Ok(data) => {
                let version = content_version(&data);
                Ok(Some(VersionedBlob { data, version }))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::backend(format!("Failed to read state file: {e}")).into()),
        }
    }

    /// Writes to a temporary file, then renames it over `path`.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", self.holder));

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to create temp state file: {e}")))?;

        file.write_all(data)
            .await
            .map_err(|e| StateError::backend(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::backend(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| StateError::backend(format!("Failed to rename state file: {e}")))?;

        Ok(())
    }

    async fn compare_and_write(
        &self,
        stack: &StackRef,
        path: &Path,
        data: &[u8],
        precondition: &Precondition,
    ) -> Result<String> {
        let current = Self::read_blob(path).await?;
        let current_version = current.as_ref().map(|b| b.version.as_str());

        if !precondition.holds(current_version) {
            return Err(StateError::WriteConflict {
                stack: stack.to_string(),
                expected: precondition.expected().to_string(),
                found: current_version.unwrap_or("<none>").to_string(),
            }
            .into());
        }

        self.write_atomic(path, data).await?;
        Ok(content_version(data))
    }
}

/// Version token of a blob: the hex SHA-256 of its bytes.
fn content_version(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[async_trait]
impl SnapshotBackend for LocalBackend {
    async fn get(&self, stack: &StackRef) -> Result<Option<VersionedBlob>> {
        let path = self.stack_path(stack);
        let blob = Self::read_blob(&path).await?;
        if blob.is_none() {
            debug!("State file does not exist: {}", path.display());
        }
        Ok(blob)
    }

    async fn put(&self, stack: &StackRef, data: Vec<u8>, precondition: Precondition) -> Result<String> {
        let path = self.stack_path(stack);
        Self::ensure_dir(&path).await?;

        let lock = FileLock::acquire(&self.write_lock_path(stack), &self.holder).await?;
        let written = self.compare_and_write(stack, &path, &data, &precondition).await;
        let released = lock.release().await;

        let version = written?;
        released?;
        debug!("Wrote {} ({} bytes)", path.display(), data.len());
        Ok(version)
    }

    async fn acquire_lock(&self, stack: &StackRef, holder: &str, ttl: chrono::Duration) -> Result<LockInfo> {
        let path = self.lock_path(stack);
        Self::ensure_dir(&path).await?;

        let lock = FileLock::acquire_with_ttl(&path, holder, ttl).await?;
        Ok(lock.into_info())
    }

    async fn release_lock(&self, stack: &StackRef, lock: &LockInfo) -> Result<()> {
        Ok(release_lock(&self.lock_path(stack), lock).await?)
    }

    async fn lock_info(&self, stack: &StackRef) -> Result<Option<LockInfo>> {
        Ok(read_lock(&self.lock_path(stack)).await?)
    }

    async fn force_unlock(&self, stack: &StackRef) -> Result<bool> {
        let deployment = remove_lock(&self.lock_path(stack)).await?;
        let write = remove_lock(&self.write_lock_path(stack)).await?;
        let removed = deployment || write;
        if removed {
            info!("Removed lock for stack {stack}");
        }
        Ok(removed)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
