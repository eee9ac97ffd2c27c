//! Snapshot storage.
//!
//! This module provides the durable record of every stack: snapshot types,
//! the backend abstraction with its local-file and in-memory implementations,
//! and the [`SnapshotStore`] through which all reads and writes go.

mod backend;
mod local;
mod lock;
mod memory;
mod store;
mod types;

pub use backend::{Precondition, SnapshotBackend, VersionedBlob};
pub use local::{LocalBackend, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use memory::InMemoryBackend;
pub use store::SnapshotStore;
pub use types::{Manifest, Snapshot, STATE_VERSION};

#[cfg(test)]
pub use backend::MockSnapshotBackend;
