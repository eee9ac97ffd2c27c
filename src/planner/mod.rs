//! Planning and execution of deployment steps.
//!
//! The [`StepGenerator`] compares desired registrations with the recorded
//! snapshot and lays out a [`Plan`]; the [`StepExecutor`] runs that plan
//! against providers, checkpointing the snapshot as steps complete.

mod executor;
mod generator;
mod graph;
mod plan;
mod step;

pub use executor::{ExecutionReport, StepExecutor, StepRecord, StepStatus};
pub use generator::StepGenerator;
pub use graph::{schedule_graph, DependencyGraph};
pub use plan::{Plan, PlanSummary, Replacement, ResourceChange};
pub use step::{ReplaceOrder, Step, StepId, StepKind, StepOp};
