//! Snapshot persistence backend trait.
//!
//! Backends store opaque blobs keyed by stack and support a single
//! compare-and-swap primitive; everything above bytes lives in
//! [`SnapshotStore`](super::SnapshotStore).

use async_trait::async_trait;

use crate::error::Result;
use crate::resource::StackRef;

use super::lock::LockInfo;

/// A stored blob together with its opaque version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    /// Stored bytes.
    pub data: Vec<u8>,
    /// Version of these bytes, changed by every write.
    pub version: String,
}

/// Condition a write must satisfy to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Nothing may be stored yet.
    MustNotExist,
    /// The stored version must equal this one.
    MatchVersion(String),
}

impl Precondition {
    /// Builds the precondition for a writer that last saw `version`.
    #[must_use]
    pub fn from_version(version: Option<String>) -> Self {
        version.map_or(Self::MustNotExist, Self::MatchVersion)
    }

    /// Returns the expected version as text, for error messages.
    #[must_use]
    pub fn expected(&self) -> &str {
        match self {
            Self::MustNotExist => "<none>",
            Self::MatchVersion(version) => version,
        }
    }

    /// Returns true if `current` satisfies this precondition.
    #[must_use]
    pub fn holds(&self, current: Option<&str>) -> bool {
        match (self, current) {
            (Self::MustNotExist, None) => true,
            (Self::MatchVersion(expected), Some(found)) => expected == found,
            _ => false,
        }
    }
}

/// Trait for snapshot storage backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Reads the blob stored for `stack`, if any.
    async fn get(&self, stack: &StackRef) -> Result<Option<VersionedBlob>>;

    /// Atomically replaces the blob for `stack` if `precondition` holds.
    ///
    /// Returns the new version. A failed precondition yields
    /// [`StateError::WriteConflict`](crate::error::StateError::WriteConflict)
    /// and leaves the stored blob untouched.
    async fn put(&self, stack: &StackRef, data: Vec<u8>, precondition: Precondition) -> Result<String>;

    /// Takes the deployment lock on `stack` for `holder`, expiring after `ttl`.
    ///
    /// A live lock held by anyone else yields
    /// [`StateError::LockedByOther`](crate::error::StateError::LockedByOther);
    /// an expired one is taken over.
    async fn acquire_lock(&self, stack: &StackRef, holder: &str, ttl: chrono::Duration) -> Result<LockInfo>;

    /// Releases a deployment lock taken with [`acquire_lock`](Self::acquire_lock).
    async fn release_lock(&self, stack: &StackRef, lock: &LockInfo) -> Result<()>;

    /// Returns the deployment lock currently held on `stack`, if any.
    async fn lock_info(&self, stack: &StackRef) -> Result<Option<LockInfo>>;

    /// Removes locks left behind on `stack`. Returns whether any existed.
    async fn force_unlock(&self, stack: &StackRef) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_holds() {
        assert!(Precondition::MustNotExist.holds(None));
        assert!(!Precondition::MustNotExist.holds(Some("1")));

        let matching = Precondition::from_version(Some(String::from("7")));
        assert!(matching.holds(Some("7")));
        assert!(!matching.holds(Some("8")));
        assert!(!matching.holds(None));
        assert_eq!(matching.expected(), "7");
    }
}
