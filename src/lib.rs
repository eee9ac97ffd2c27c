// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(warnings)]                    // All warnings are treated as errors
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # converge
//!
//! A dependency-aware, crash-recoverable infrastructure deployment engine.
//!
//! ## Overview
//!
//! Given the resources a program declares and the snapshot recorded by the
//! previous run, converge computes and executes the create, update, replace
//! and delete operations that bring the infrastructure in line with the
//! program:
//!
//! - Every resource change is classified against the recorded snapshot
//! - Steps run in parallel where the dependency graph allows it
//! - The snapshot is checkpointed after every step, so a crash loses nothing
//! - Protected resources can never be deleted or replaced by accident
//!
//! ## Architecture
//!
//! 1. **Desired state**: registrations from a [`program`] source
//! 2. **Recorded state**: the [`state`] snapshot of the previous run
//! 3. **Planning**: the [`planner`] step generator diffs the two
//! 4. **Execution**: the [`planner`] step executor calls [`provider`]s and
//!    checkpoints the snapshot
//!
//! [`deployment`] ties the phases together for one run.
//!
//! ## Modules
//!
//! - [`resource`]: URNs, stacks and recorded resource state
//! - [`program`]: registrations and desired-state sources
//! - [`provider`]: provider trait and registry
//! - [`state`]: snapshot storage backends
//! - [`planner`]: step generation and execution
//! - [`deployment`]: end-to-end runs
//! - [`config`]: configuration parsing and validation
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # converge.program.yaml
//! resources:
//!   - name: network
//!     type: echo:index:Network
//!     inputs:
//!       cidr: 10.0.0.0/16
//!   - name: database
//!     type: echo:index:Database
//!     depends_on: [network]
//!     protect: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod context;
pub mod deployment;
pub mod error;
pub mod planner;
pub mod program;
pub mod provider;
pub mod resource;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, EngineConfig};
pub use context::{CancellationHandle, DeploymentContext, DeploymentOptions, DEPLOYMENT_LOCK_SECS};
pub use deployment::{Deployment, DeploymentResult, DeploymentStatus, ResourceOutcome};
pub use error::{ConvergeError, Result};
pub use planner::{ExecutionReport, Plan, StepExecutor, StepGenerator};
pub use program::{DesiredStateSource, ProgramManifest, Registration};
pub use provider::{EchoProvider, Provider, ProviderRegistry};
pub use resource::{ResourceState, StackRef, Urn};
pub use state::{LocalBackend, Snapshot, SnapshotBackend, SnapshotStore};
