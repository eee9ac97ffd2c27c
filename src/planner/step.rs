//! Steps: the unit of work the executor schedules.

use serde::Serialize;
use std::fmt;

use crate::resource::{ResourceState, Urn};

/// Index of a step in its plan.
pub type StepId = usize;

/// Kinds of steps, and of per-resource changes.
///
/// `Replace` only describes a change; it is carried out by a
/// `CreateReplacement` and a `DeleteReplaced` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Nothing changes.
    Same,
    /// Create a new resource.
    Create,
    /// Update in place.
    Update,
    /// Delete a resource no longer desired.
    Delete,
    /// Replace a resource.
    Replace,
    /// Create the replacement of a resource.
    CreateReplacement,
    /// Delete the resource a replacement superseded.
    DeleteReplaced,
}

/// Order in which the two halves of a replacement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceOrder {
    /// Create the new resource, then delete the old one.
    CreateBeforeDelete,
    /// Delete the old resource, then create the new one.
    DeleteBeforeCreate,
}

/// What a step does, with the states it operates on.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOp {
    /// Carry the old state forward.
    Same {
        /// Recorded state.
        old: ResourceState,
        /// State to record.
        new: ResourceState,
    },
    /// Create a resource.
    Create {
        /// Desired state; ID and outputs are filled in by the provider.
        new: ResourceState,
    },
    /// Update a resource in place.
    Update {
        /// Recorded state.
        old: ResourceState,
        /// Desired state.
        new: ResourceState,
        /// Properties that changed.
        changed: Vec<String>,
        /// False for state-only updates, where only metadata changed.
        provider_call: bool,
    },
    /// Delete a resource.
    Delete {
        /// Recorded state.
        old: ResourceState,
    },
    /// Create the replacement of a resource.
    CreateReplacement {
        /// Recorded state being replaced.
        old: ResourceState,
        /// Desired state.
        new: ResourceState,
        /// Properties forcing the replacement.
        replace_keys: Vec<String>,
        /// Order of the replacement.
        order: ReplaceOrder,
    },
    /// Delete a replaced resource.
    DeleteReplaced {
        /// Recorded state being deleted.
        old: ResourceState,
        /// Order of the replacement.
        order: ReplaceOrder,
    },
}

/// A scheduled unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Position in the plan.
    pub id: StepId,
    /// Index of the change this step carries out.
    pub change: usize,
    /// Resource the step acts on.
    pub urn: Urn,
    /// Index of the old snapshot entry this step consumes, if any.
    pub old_index: Option<usize>,
    /// The operation.
    pub op: StepOp,
}

impl StepOp {
    /// Returns the step kind.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Same { .. } => StepKind::Same,
            Self::Create { .. } => StepKind::Create,
            Self::Update { .. } => StepKind::Update,
            Self::Delete { .. } => StepKind::Delete,
            Self::CreateReplacement { .. } => StepKind::CreateReplacement,
            Self::DeleteReplaced { .. } => StepKind::DeleteReplaced,
        }
    }
}

impl Step {
    /// Returns the step kind.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        self.op.kind()
    }

    /// Returns the recorded state this step acts on.
    #[must_use]
    pub const fn old(&self) -> Option<&ResourceState> {
        match &self.op {
            StepOp::Same { old, .. }
            | StepOp::Update { old, .. }
            | StepOp::Delete { old }
            | StepOp::CreateReplacement { old, .. }
            | StepOp::DeleteReplaced { old, .. } => Some(old),
            StepOp::Create { .. } => None,
        }
    }

    /// Returns the desired state this step produces.
    #[must_use]
    pub const fn new_state(&self) -> Option<&ResourceState> {
        match &self.op {
            StepOp::Same { new, .. }
            | StepOp::Create { new }
            | StepOp::Update { new, .. }
            | StepOp::CreateReplacement { new, .. } => Some(new),
            StepOp::Delete { .. } | StepOp::DeleteReplaced { .. } => None,
        }
    }

    /// Returns true for steps that remove an old resource.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        matches!(self.op, StepOp::Delete { .. } | StepOp::DeleteReplaced { .. })
    }

    /// Returns the replacement order, for replacement steps.
    #[must_use]
    pub const fn replace_order(&self) -> Option<ReplaceOrder> {
        match &self.op {
            StepOp::CreateReplacement { order, .. } | StepOp::DeleteReplaced { order, .. } => {
                Some(*order)
            }
            _ => None,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Same => "same",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace => "replace",
            Self::CreateReplacement => "create-replacement",
            Self::DeleteReplaced => "delete-replaced",
        };
        f.write_str(label)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.kind(), self.urn)
    }
}
