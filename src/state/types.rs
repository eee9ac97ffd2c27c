//! Snapshot types: the durable record of what a stack contains.
//!
//! A snapshot is an ordered list of resource states. The order is
//! topological: every parent and dependency recorded in the snapshot appears
//! before the resources that refer to it, which is what lets deletes walk the
//! list backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::StateError;
use crate::provider::PluginInfo;
use crate::resource::{ResourceState, Urn};

/// Current version of the snapshot envelope format.
pub const STATE_VERSION: &str = "1";

/// Metadata describing the run that wrote a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// When the snapshot was written.
    pub time: DateTime<Utc>,
    /// Version of the engine that wrote it.
    pub engine_version: String,
    /// Plugins in use at the time.
    #[serde(default)]
    pub plugins: Vec<PluginInfo>,
}

/// The recorded state of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Run metadata.
    pub manifest: Manifest,
    /// Resource states in topological order.
    #[serde(default)]
    pub resources: Vec<ResourceState>,
}

impl Manifest {
    /// Creates a manifest stamped with the current time and engine version.
    #[must_use]
    pub fn new(plugins: Vec<PluginInfo>) -> Self {
        Self {
            time: Utc::now(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            plugins,
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Manifest::default(), Vec::new())
    }

    /// Creates a snapshot from its parts.
    #[must_use]
    pub const fn new(manifest: Manifest, resources: Vec<ResourceState>) -> Self {
        Self {
            manifest,
            resources,
        }
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Finds the live (not pending delete) entry for `urn`.
    #[must_use]
    pub fn find(&self, urn: &Urn) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| &r.urn == urn && !r.pending_delete)
    }

    /// Checks the ordering and uniqueness invariants.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupted`] if a parent or dependency that is
    /// recorded in the snapshot appears after its dependent, or if a URN is
    /// recorded twice outside of pending deletes.
    pub fn verify_integrity(&self) -> Result<(), StateError> {
        let present: HashSet<&Urn> = self.resources.iter().map(|r| &r.urn).collect();
        let mut seen: HashSet<&Urn> = HashSet::with_capacity(self.resources.len());
        let mut live: HashSet<&Urn> = HashSet::with_capacity(self.resources.len());

        for resource in &self.resources {
            for predecessor in resource.predecessors() {
                if present.contains(predecessor) && !seen.contains(predecessor) {
                    return Err(StateError::corrupted(format!(
                        "{} refers to {predecessor}, which is recorded after it",
                        resource.urn
                    )));
                }
            }

            if !resource.pending_delete && !live.insert(&resource.urn) {
                return Err(StateError::corrupted(format!(
                    "duplicate resource {}",
                    resource.urn
                )));
            }
            seen.insert(&resource.urn);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StackRef;

    fn state(name: &str) -> ResourceState {
        let urn = StackRef::new("web", "dev")
            .urn(None, "echo:index:Bucket", name)
            .unwrap();
        ResourceState::new(urn, true)
    }

    #[test]
    fn test_ordered_snapshot_is_valid() {
        let a = state("a");
        let mut b = state("b");
        b.dependencies.push(a.urn.clone());

        let snapshot = Snapshot::new(Manifest::default(), vec![a, b]);
        assert!(snapshot.verify_integrity().is_ok());
    }

    #[test]
    fn test_dependency_after_dependent_is_corrupt() {
        let a = state("a");
        let mut b = state("b");
        b.dependencies.push(a.urn.clone());

        let snapshot = Snapshot::new(Manifest::default(), vec![b, a]);
        assert!(matches!(
            snapshot.verify_integrity(),
            Err(StateError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_missing_dependency_is_tolerated() {
        let mut b = state("b");
        b.dependencies.push(state("gone").urn);

        let snapshot = Snapshot::new(Manifest::default(), vec![b]);
        assert!(snapshot.verify_integrity().is_ok());
    }

    #[test]
    fn test_duplicates_only_allowed_for_pending_delete() {
        let mut old = state("a");
        old.pending_delete = true;
        let snapshot = Snapshot::new(Manifest::default(), vec![state("a"), old]);
        assert!(snapshot.verify_integrity().is_ok());
        assert!(!snapshot.find(&state("a").urn).unwrap().pending_delete);

        let snapshot = Snapshot::new(Manifest::default(), vec![state("a"), state("a")]);
        assert!(snapshot.verify_integrity().is_err());
    }
}
