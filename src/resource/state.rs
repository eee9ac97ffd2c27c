//! Recorded state of a single resource.

use serde::{Deserialize, Serialize};

use super::properties::PropertyMap;
use super::urn::Urn;

/// The recorded state of one resource, as stored in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Stable logical identity.
    pub urn: Urn,
    /// Resource type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// True for provider-managed resources, false for components.
    pub custom: bool,
    /// Provider-assigned physical ID (custom resources only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Input properties as declared.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Output properties as reported by the provider.
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Parent resource, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Urn>,
    /// Resources this one depends on.
    #[serde(default)]
    pub dependencies: Vec<Urn>,
    /// Forbids deletion and replacement.
    #[serde(default)]
    pub protect: bool,
    /// Replace by deleting the old resource before creating the new one.
    #[serde(default)]
    pub delete_before_replace: bool,
    /// Drop from state on delete without calling the provider.
    #[serde(default)]
    pub retain_on_delete: bool,
    /// Superseded by a replacement; the physical resource still awaits deletion.
    #[serde(default)]
    pub pending_delete: bool,
    /// Physically deleted by a delete-before-replace that has not yet recreated it.
    #[serde(default)]
    pub pending_replacement: bool,
}

impl ResourceState {
    /// Creates a state with no properties for the given URN.
    #[must_use]
    pub fn new(urn: Urn, custom: bool) -> Self {
        let type_token = urn.type_token().to_string();
        Self {
            urn,
            type_token,
            custom,
            id: None,
            inputs: PropertyMap::new(),
            outputs: PropertyMap::new(),
            parent: None,
            dependencies: Vec::new(),
            protect: false,
            delete_before_replace: false,
            retain_on_delete: false,
            pending_delete: false,
            pending_replacement: false,
        }
    }

    /// Returns the URNs that must precede this resource: parent then dependencies.
    pub fn predecessors(&self) -> impl Iterator<Item = &Urn> {
        self.parent.iter().chain(self.dependencies.iter())
    }

    /// Returns true if `urn` is this resource's parent or one of its dependencies.
    #[must_use]
    pub fn depends_on(&self, urn: &Urn) -> bool {
        self.predecessors().any(|u| u == urn)
    }

    /// Returns true if any non-property attribute differs from `other`.
    ///
    /// Dependency order is not significant.
    #[must_use]
    pub fn metadata_differs(&self, other: &Self) -> bool {
        let mut ours: Vec<&Urn> = self.dependencies.iter().collect();
        let mut theirs: Vec<&Urn> = other.dependencies.iter().collect();
        ours.sort();
        ours.dedup();
        theirs.sort();
        theirs.dedup();

        ours != theirs
            || self.parent != other.parent
            || self.protect != other.protect
            || self.delete_before_replace != other.delete_before_replace
            || self.retain_on_delete != other.retain_on_delete
    }
}
