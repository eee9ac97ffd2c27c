//! YAML program manifests.
//!
//! A manifest declares resources by local name. References between them
//! (`parent`, `depends_on`) use those names and are resolved to URNs when the
//! manifest is turned into registrations.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, ConvergeError, Result};
use crate::resource::{PropertyMap, StackRef, Urn};

use super::registration::Registration;
use super::source::StaticSource;

/// A declarative program: an ordered list of resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramManifest {
    /// Declared resources, in registration order.
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
}

/// One resource in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Local name, also used as the logical name.
    pub name: String,
    /// Type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Declare a component instead of a provider-managed resource.
    #[serde(default)]
    pub component: bool,
    /// Local name of the parent; must be declared earlier.
    #[serde(default)]
    pub parent: Option<String>,
    /// Local names of dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Input properties.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Protect from deletion and replacement.
    #[serde(default)]
    pub protect: bool,
    /// Input paths to ignore when diffing.
    #[serde(default)]
    pub ignore_changes: Vec<String>,
    /// Replace by deleting first.
    #[serde(default)]
    pub delete_before_replace: bool,
    /// Keep the physical resource when it is removed.
    #[serde(default)]
    pub retain_on_delete: bool,
}

impl ProgramManifest {
    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading program from: {}", path.display());

        if !path.exists() {
            return Err(ConvergeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(content: &str, source: Option<&Path>) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(content).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;
        debug!("Parsed program with {} resources", manifest.resources.len());
        Ok(manifest)
    }

    /// Resolves local names and produces registrations for `stack`.
    ///
    /// Top-level resources are parented under the stack root.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unresolvable references, a parent
    /// declared after its child, or an invalid name or type.
    pub fn registrations(&self, stack: &StackRef) -> Result<Vec<Registration>> {
        let root_urn = stack.root_urn()?;
        let mut urns: HashMap<&str, Urn> = HashMap::new();
        let mut registrations = Vec::with_capacity(self.resources.len());

        // Parents must be resolved first since a child's URN embeds its
        // parent's type chain.
        for decl in &self.resources {
            if urns.contains_key(decl.name.as_str()) {
                return Err(ConfigError::DuplicateName {
                    name: decl.name.clone(),
                }
                .into());
            }

            let mut registration = if decl.component {
                Registration::component(&decl.type_token, &decl.name)
            } else {
                Registration::custom(&decl.type_token, &decl.name)
            };
            registration.inputs.clone_from(&decl.inputs);
            registration.protect = decl.protect;
            registration.ignore_changes.clone_from(&decl.ignore_changes);
            registration.delete_before_replace = decl.delete_before_replace;
            registration.retain_on_delete = decl.retain_on_delete;

            let parent_urn = match &decl.parent {
                Some(parent) => urns.get(parent.as_str()).ok_or_else(|| {
                    ConfigError::UnknownReference {
                        resource: decl.name.clone(),
                        reference: parent.clone(),
                    }
                })?,
                None => &root_urn,
            };
            registration.parent = Some(parent_urn.clone());

            urns.insert(&decl.name, registration.urn(stack)?);
            registrations.push(registration);
        }

        for (decl, registration) in self.resources.iter().zip(registrations.iter_mut()) {
            for dependency in &decl.depends_on {
                let urn = urns.get(dependency.as_str()).ok_or_else(|| {
                    ConfigError::UnknownReference {
                        resource: decl.name.clone(),
                        reference: dependency.clone(),
                    }
                })?;
                registration.dependencies.push(urn.clone());
            }
        }

        Ok(registrations)
    }

    /// Resolves the manifest into a source for `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be resolved.
    pub fn into_source(&self, stack: &StackRef) -> Result<StaticSource> {
        self.registrations(stack).map(StaticSource::new)
    }
}
