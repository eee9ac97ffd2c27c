//! Error types for the converge deployment engine.
//!
//! This module provides the error hierarchy for every phase of a deployment
//! run: configuration, planning, provider operations and snapshot storage.
//! Planning and storage errors are fatal to a run; provider errors are
//! contained to the resource that produced them.

use std::path::PathBuf;
use thiserror::Error;

use crate::provider::PartialState;

/// The main error type for the converge deployment engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Planning errors. Raised before any mutation happens.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Snapshot storage errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// A provider operation failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override could not be interpreted.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },

    /// Duplicate resource definition in a program manifest.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A program manifest refers to a resource it does not declare.
    #[error("Resource '{resource}' refers to unknown resource '{reference}'")]
    UnknownReference {
        /// The resource holding the reference.
        resource: String,
        /// The name that could not be resolved.
        reference: String,
    },
}

/// Planning errors.
///
/// Every variant aborts a deployment before any provider mutation is issued.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A logical resource name contains disallowed characters.
    #[error("Invalid resource name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A type token is malformed.
    #[error("Invalid type token '{type_token}': expected 'package:module:Type'")]
    InvalidType {
        /// The rejected type token.
        type_token: String,
    },

    /// A URN string could not be parsed.
    #[error("Invalid URN '{urn}': {reason}")]
    InvalidUrn {
        /// The rejected URN.
        urn: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two registrations resolved to the same URN.
    #[error("Duplicate resource URN: {urn}")]
    DuplicateUrn {
        /// The duplicated URN.
        urn: String,
    },

    /// A protected resource would be deleted or replaced.
    #[error("Refusing to {operation} protected resource {urn}; set protect to false first")]
    ProtectedResource {
        /// The protected resource.
        urn: String,
        /// The refused operation ("delete" or "replace").
        operation: String,
    },

    /// The desired graph contains a dependency cycle.
    #[error("Circular dependency detected: {cycle}")]
    CyclicDependency {
        /// Resources participating in the cycle.
        cycle: String,
    },

    /// A registration depends on a resource that was never registered.
    #[error("Resource {urn} depends on unregistered resource {dependency}")]
    UnknownDependency {
        /// The dependent resource.
        urn: String,
        /// The missing dependency.
        dependency: String,
    },

    /// No provider is registered for a custom resource type.
    #[error("No provider registered for resource type '{type_token}'")]
    MissingProvider {
        /// The unresolved type token.
        type_token: String,
    },

    /// The provider failed to diff a resource.
    #[error("Failed to diff {urn}: {message}")]
    DiffFailed {
        /// The resource being diffed.
        urn: String,
        /// Provider message.
        message: String,
    },
}

/// Snapshot storage errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// No snapshot exists for the stack.
    #[error("No snapshot found for stack {stack}")]
    NotFound {
        /// The stack that was looked up.
        stack: String,
    },

    /// The stored snapshot changed since this deployment last read it.
    #[error("Snapshot for stack {stack} was modified concurrently (expected version {expected}, found {found})")]
    WriteConflict {
        /// The contested stack.
        stack: String,
        /// Version this writer expected.
        expected: String,
        /// Version actually stored.
        found: String,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// The persistence backend failed.
    #[error("State backend error: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State format version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// A failed provider operation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Description of the failure.
    pub message: String,
    /// State the provider managed to reach before failing, if any.
    pub partial: Option<PartialState>,
}

/// Result type alias for converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if another writer or deployment holds the stack.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::WriteConflict { .. } | StateError::LockedByOther { .. })
        )
    }

    /// Returns true if this error was raised before any mutation.
    #[must_use]
    pub const fn is_planning_error(&self) -> bool {
        matches!(self, Self::Plan(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl PlanError {
    /// Creates a protect violation for the given resource and operation.
    #[must_use]
    pub fn protected(urn: impl Into<String>, operation: &str) -> Self {
        Self::ProtectedResource {
            urn: urn.into(),
            operation: operation.to_string(),
        }
    }
}

impl StateError {
    /// Creates a backend error with the given message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a provider error without partial state.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial: None,
        }
    }

    /// Attaches the partial state reached before the failure.
    #[must_use]
    pub fn with_partial(mut self, partial: PartialState) -> Self {
        self.partial = Some(partial);
        self
    }
}
