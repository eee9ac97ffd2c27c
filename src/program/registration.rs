//! Resource registrations: one record per resource a program declares.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlanError;
use crate::resource::{PropertyMap, StackRef, Urn, ROOT_STACK_TYPE};

/// A resource declared by the running program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Resource type token (`package:module:Type`).
    #[serde(rename = "type")]
    pub type_token: String,
    /// Logical name, unique among siblings of the same type.
    pub name: String,
    /// Provider-managed (true) or component (false).
    pub custom: bool,
    /// Parent resource; the root stack when absent.
    #[serde(default)]
    pub parent: Option<Urn>,
    /// Declared inputs.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: Vec<Urn>,
    /// Forbid deletion and replacement.
    #[serde(default)]
    pub protect: bool,
    /// Input paths whose changes are ignored when diffing.
    #[serde(default)]
    pub ignore_changes: Vec<String>,
    /// Replace by deleting first.
    #[serde(default)]
    pub delete_before_replace: bool,
    /// Leave the physical resource in place when it is deleted from state.
    #[serde(default)]
    pub retain_on_delete: bool,
}

impl Registration {
    /// Declares a provider-managed resource.
    #[must_use]
    pub fn custom(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_kind(type_token.into(), name.into(), true)
    }

    /// Declares a component resource, which only groups children.
    #[must_use]
    pub fn component(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_kind(type_token.into(), name.into(), false)
    }

    /// Declares the root stack pseudo-resource of `stack`.
    #[must_use]
    pub fn root(stack: &StackRef) -> Self {
        Self::component(ROOT_STACK_TYPE, stack.root_name())
    }

    const fn with_kind(type_token: String, name: String, custom: bool) -> Self {
        Self {
            type_token,
            name,
            custom,
            parent: None,
            inputs: PropertyMap::new(),
            dependencies: Vec::new(),
            protect: false,
            ignore_changes: Vec::new(),
            delete_before_replace: false,
            retain_on_delete: false,
        }
    }

    /// Sets one input property.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Replaces all inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: PropertyMap) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the parent.
    #[must_use]
    pub fn with_parent(mut self, parent: Urn) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, dependency: Urn) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Sets the protect flag.
    #[must_use]
    pub const fn protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }

    /// Adds input paths to ignore when diffing.
    #[must_use]
    pub fn ignore_changes<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_changes.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Sets the delete-before-replace flag.
    #[must_use]
    pub const fn delete_before_replace(mut self, value: bool) -> Self {
        self.delete_before_replace = value;
        self
    }

    /// Sets the retain-on-delete flag.
    #[must_use]
    pub const fn retain_on_delete(mut self, value: bool) -> Self {
        self.retain_on_delete = value;
        self
    }

    /// Returns true if this registration is the root stack pseudo-resource.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.type_token == ROOT_STACK_TYPE
    }

    /// Computes this resource's URN within `stack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or type token is invalid.
    pub fn urn(&self, stack: &StackRef) -> Result<Urn, PlanError> {
        stack.urn(self.parent.as_ref(), &self.type_token, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_and_urn() {
        let stack = StackRef::new("web", "prod");
        let bucket = Registration::custom("echo:index:Bucket", "assets")
            .with_input("size", json!(10))
            .protect(true)
            .ignore_changes(["tags"]);

        assert!(bucket.custom);
        assert!(bucket.protect);
        assert_eq!(bucket.ignore_changes, vec!["tags"]);
        assert_eq!(
            bucket.urn(&stack).unwrap().as_str(),
            "urn:converge:prod::web::echo:index:Bucket::assets"
        );
    }

    #[test]
    fn test_root_registration() {
        let stack = StackRef::new("web", "prod");
        let root = Registration::root(&stack);

        assert!(root.is_root());
        assert!(!root.custom);
        assert_eq!(root.urn(&stack).unwrap(), stack.root_urn().unwrap());
    }

    #[test]
    fn test_invalid_name_fails() {
        let stack = StackRef::new("web", "prod");
        let bad = Registration::custom("echo:index:Bucket", "a::b");

        assert!(matches!(bad.urn(&stack), Err(PlanError::InvalidName { .. })));
    }
}
