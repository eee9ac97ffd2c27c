//! Configuration types for the engine.
//!
//! These structs map to `converge.yaml`: which project and stack to deploy,
//! where snapshots live, how the executor runs and how the built-in provider
//! behaves.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::DeploymentOptions;
use crate::provider::EchoProvider;
use crate::resource::StackRef;
use crate::state::STATE_DIR;

/// Default program manifest file name.
pub const DEFAULT_PROGRAM_FILE: &str = "converge.program.yaml";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Project and stack selection.
    pub project: ProjectConfig,
    /// Snapshot storage.
    #[serde(default)]
    pub state: StateConfig,
    /// Executor settings.
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// Program manifest declaring the desired resources.
    #[serde(default = "default_program")]
    pub program: PathBuf,
    /// Built-in provider settings.
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Stack (deployment target) name.
    #[serde(default = "default_stack")]
    pub stack: String,
}

/// Snapshot storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// State directory; `.converge` next to the configuration when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentConfig {
    /// Maximum number of steps in flight.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Stop starting steps after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            timeout_secs: None,
        }
    }
}

/// Built-in provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvidersConfig {
    /// The `echo` provider.
    #[serde(default)]
    pub echo: EchoConfig,
}

/// Settings for the `echo` provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EchoConfig {
    /// Input properties whose change forces a replacement.
    #[serde(default)]
    pub force_new: Vec<String>,
    /// Replace by deleting first.
    #[serde(default)]
    pub delete_before_replace: bool,
}

fn default_stack() -> String {
    String::from("dev")
}

const fn default_parallelism() -> usize {
    4
}

fn default_program() -> PathBuf {
    PathBuf::from(DEFAULT_PROGRAM_FILE)
}

impl EngineConfig {
    /// Returns the stack this configuration targets.
    #[must_use]
    pub fn stack_ref(&self) -> StackRef {
        StackRef::new(&self.project.name, &self.project.stack)
    }

    /// Returns the executor options.
    #[must_use]
    pub fn deployment_options(&self) -> DeploymentOptions {
        DeploymentOptions {
            parallelism: self.deployment.parallelism.max(1),
            timeout: self.deployment.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Resolves the state directory against `base`.
    #[must_use]
    pub fn state_dir(&self, base: &Path) -> PathBuf {
        base.join(self.state.path.as_deref().unwrap_or_else(|| Path::new(STATE_DIR)))
    }

    /// Resolves the program manifest path against `base`.
    #[must_use]
    pub fn program_path(&self, base: &Path) -> PathBuf {
        base.join(&self.program)
    }

    /// Builds the configured `echo` provider.
    #[must_use]
    pub fn echo_provider(&self) -> EchoProvider {
        EchoProvider::new()
            .with_force_new(self.providers.echo.force_new.iter().cloned())
            .with_delete_before_replace(self.providers.echo.delete_before_replace)
    }
}
