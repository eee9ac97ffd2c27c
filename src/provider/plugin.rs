//! Provider capability interface.
//!
//! A provider performs the actual infrastructure mutations for the resource
//! types it owns. The engine never inspects provider semantics: it asks the
//! provider to diff, create, update and delete, and records what comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::resource::PropertyMap;

/// Name and version of a provider plugin, recorded in snapshot manifests.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: String,
}

/// Outcome of a provider diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffResponse {
    /// No change required.
    Same,
    /// The change can be applied in place.
    Update {
        /// Properties that changed.
        changed: Vec<String>,
    },
    /// The change requires recreating the resource.
    Replace {
        /// Properties forcing the replacement.
        replace_keys: Vec<String>,
        /// The provider cannot run old and new side by side.
        delete_before_replace: bool,
    },
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResponse {
    /// Physical ID assigned by the provider.
    pub id: String,
    /// Output properties.
    pub outputs: PropertyMap,
}

/// State a provider reached before an operation failed.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialState {
    /// Physical ID, if the resource came into existence.
    pub id: Option<String>,
    /// Outputs observed so far.
    pub outputs: PropertyMap,
}

/// Resource provider plugin.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns plugin metadata.
    fn plugin(&self) -> PluginInfo;

    /// Compares recorded inputs/outputs against new inputs.
    async fn diff(
        &self,
        type_token: &str,
        id: &str,
        old_inputs: &PropertyMap,
        old_outputs: &PropertyMap,
        new_inputs: &PropertyMap,
    ) -> Result<DiffResponse, ProviderError>;

    /// Creates a resource.
    async fn create(
        &self,
        type_token: &str,
        inputs: &PropertyMap,
    ) -> Result<CreateResponse, ProviderError>;

    /// Updates a resource in place, returning its new outputs.
    async fn update(
        &self,
        type_token: &str,
        id: &str,
        old_inputs: &PropertyMap,
        new_inputs: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError>;

    /// Deletes a resource.
    async fn delete(
        &self,
        type_token: &str,
        id: &str,
        outputs: &PropertyMap,
    ) -> Result<(), ProviderError>;
}

impl PartialState {
    /// Partial state for a resource that exists under `id`.
    #[must_use]
    pub fn created(id: impl Into<String>, outputs: PropertyMap) -> Self {
        Self {
            id: Some(id.into()),
            outputs,
        }
    }
}

impl std::fmt::Display for PluginInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
