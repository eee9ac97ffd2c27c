//! Built-in provider that materializes resources as their own inputs.
//!
//! The echo provider lets the engine drive complete deployments without
//! any external plugin: creates mint a fresh physical ID and echo the inputs
//! back as outputs. Properties listed as `force_new` require replacement.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::resource::{changed_keys, PropertyMap};

use super::plugin::{CreateResponse, DiffResponse, PluginInfo, Provider};

/// Provider that echoes inputs back as outputs.
#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
    /// Properties whose change forces a replacement.
    force_new: BTreeSet<String>,
    /// Whether replacements must delete before creating.
    delete_before_replace: bool,
}

impl EchoProvider {
    /// Creates an echo provider that updates every change in place.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks properties whose change requires replacement.
    #[must_use]
    pub fn with_force_new<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.force_new.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Requires replacements to delete the old resource first.
    #[must_use]
    pub const fn with_delete_before_replace(mut self, delete_before_replace: bool) -> Self {
        self.delete_before_replace = delete_before_replace;
        self
    }

    fn outputs_for(id: &str, inputs: &PropertyMap) -> PropertyMap {
        let mut outputs = inputs.clone();
        outputs.insert(String::from("id"), Value::String(id.to_string()));
        outputs
    }
}

#[async_trait]
impl Provider for EchoProvider {
    fn plugin(&self) -> PluginInfo {
        PluginInfo {
            name: String::from("echo"),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn diff(
        &self,
        _type_token: &str,
        _id: &str,
        old_inputs: &PropertyMap,
        _old_outputs: &PropertyMap,
        new_inputs: &PropertyMap,
    ) -> Result<DiffResponse, ProviderError> {
        let changed = changed_keys(old_inputs, new_inputs);
        if changed.is_empty() {
            return Ok(DiffResponse::Same);
        }

        let replace_keys: Vec<String> = changed
            .iter()
            .filter(|k| self.force_new.contains(*k))
            .cloned()
            .collect();

        if replace_keys.is_empty() {
            Ok(DiffResponse::Update { changed })
        } else {
            Ok(DiffResponse::Replace {
                replace_keys,
                delete_before_replace: self.delete_before_replace,
            })
        }
    }

    async fn create(
        &self,
        type_token: &str,
        inputs: &PropertyMap,
    ) -> Result<CreateResponse, ProviderError> {
        let id = Uuid::new_v4().to_string();
        debug!("echo: created {type_token} as {id}");
        Ok(CreateResponse {
            outputs: Self::outputs_for(&id, inputs),
            id,
        })
    }

    async fn update(
        &self,
        type_token: &str,
        id: &str,
        _old_inputs: &PropertyMap,
        new_inputs: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError> {
        debug!("echo: updated {type_token} {id}");
        Ok(Self::outputs_for(id, new_inputs))
    }

    async fn delete(
        &self,
        type_token: &str,
        id: &str,
        _outputs: &PropertyMap,
    ) -> Result<(), ProviderError> {
        debug!("echo: deleted {type_token} {id}");
        Ok(())
    }
}
