//! Plugin registry resolving resource types to providers.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::PlanError;

use super::plugin::{PluginInfo, Provider};

/// Registry of providers, looked up by type token.
///
/// An exact type registration wins over a package registration; the package
/// is the first segment of a `package:module:Type` token.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    /// Providers by package name.
    by_package: HashMap<String, Arc<dyn Provider>>,
    /// Providers by exact type token.
    by_type: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for every type in `package`.
    pub fn register(&mut self, package: impl Into<String>, provider: Arc<dyn Provider>) {
        let package = package.into();
        debug!("Registering provider {} for package {package}", provider.plugin());
        self.by_package.insert(package, provider);
    }

    /// Registers a provider for a single type token.
    pub fn register_type(&mut self, type_token: impl Into<String>, provider: Arc<dyn Provider>) {
        self.by_type.insert(type_token.into(), provider);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_provider(mut self, package: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(package, provider);
        self
    }

    /// Looks up the provider for a type token.
    #[must_use]
    pub fn get(&self, type_token: &str) -> Option<Arc<dyn Provider>> {
        if let Some(provider) = self.by_type.get(type_token) {
            return Some(Arc::clone(provider));
        }
        let package = type_token.split(':').next().unwrap_or(type_token);
        self.by_package.get(package).map(Arc::clone)
    }

    /// Looks up the provider for a type token, failing if none is registered.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::MissingProvider`] if no provider owns the type.
    pub fn require(&self, type_token: &str) -> Result<Arc<dyn Provider>, PlanError> {
        self.get(type_token).ok_or_else(|| PlanError::MissingProvider {
            type_token: type_token.to_string(),
        })
    }

    /// Returns metadata for every registered plugin, sorted and deduplicated.
    #[must_use]
    pub fn plugins(&self) -> Vec<PluginInfo> {
        let mut plugins: Vec<PluginInfo> = self
            .by_package
            .values()
            .chain(self.by_type.values())
            .map(|p| p.plugin())
            .collect();
        plugins.sort();
        plugins.dedup();
        plugins
    }

    /// Returns true if no provider is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_package.is_empty() && self.by_type.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut packages: Vec<&String> = self.by_package.keys().collect();
        packages.sort();
        let mut types: Vec<&String> = self.by_type.keys().collect();
        types.sort();
        f.debug_struct("ProviderRegistry")
            .field("packages", &packages)
            .field("types", &types)
            .finish()
    }
}
