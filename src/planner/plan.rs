//! Plans: the ordered arena of steps for one deployment.
//!
//! A plan is built once from the per-resource changes the generator
//! classified, then consumed by the executor.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::resource::{ResourceState, Urn};

use super::step::{ReplaceOrder, Step, StepId, StepKind, StepOp};

/// A replacement of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Replacement {
    /// Index of the recorded entry being replaced.
    pub old_index: usize,
    /// Recorded state.
    pub old: ResourceState,
    /// Desired state.
    pub new: ResourceState,
    /// Properties forcing the replacement.
    pub replace_keys: Vec<String>,
    /// Order of the two halves.
    pub order: ReplaceOrder,
}

/// The action required for one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceChange {
    /// Nothing to do.
    Same {
        /// Index of the recorded entry.
        old_index: usize,
        /// Recorded state.
        old: ResourceState,
        /// Desired state, carrying the recorded ID and outputs.
        new: ResourceState,
    },
    /// Create the resource.
    Create {
        /// Desired state.
        new: ResourceState,
        /// A pending-replacement entry this creation supersedes.
        consumes: Option<usize>,
    },
    /// Update in place.
    Update {
        /// Index of the recorded entry.
        old_index: usize,
        /// Recorded state.
        old: ResourceState,
        /// Desired state.
        new: ResourceState,
        /// Properties that changed.
        changed: Vec<String>,
        /// False when only metadata changed.
        provider_call: bool,
    },
    /// Delete the recorded resource.
    Delete {
        /// Index of the recorded entry.
        old_index: usize,
        /// Recorded state.
        old: ResourceState,
    },
    /// Replace the resource.
    Replace(Replacement),
}

impl ResourceChange {
    /// Returns the resource's URN.
    #[must_use]
    pub const fn urn(&self) -> &Urn {
        match self {
            Self::Same { new, .. } | Self::Create { new, .. } | Self::Update { new, .. } => &new.urn,
            Self::Delete { old, .. } => &old.urn,
            Self::Replace(replacement) => &replacement.new.urn,
        }
    }

    /// Returns the change kind.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Same { .. } => StepKind::Same,
            Self::Create { .. } => StepKind::Create,
            Self::Update { .. } => StepKind::Update,
            Self::Delete { .. } => StepKind::Delete,
            Self::Replace(_) => StepKind::Replace,
        }
    }
}

/// Counts of changes by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Unchanged resources.
    pub same: usize,
    /// Resources to create.
    pub create: usize,
    /// Resources to update.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
}

impl PlanSummary {
    /// Returns the number of resources that change.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.create + self.update + self.replace + self.delete
    }
}

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Per-resource changes, desired resources first in processing order.
    pub changes: Vec<ResourceChange>,
    /// Steps in plan order.
    pub steps: Vec<Step>,
}

impl Plan {
    /// Lays out the steps for `changes`.
    ///
    /// Non-delete steps come first in change order, with delete-before-create
    /// replacements inline. Every delete-type step follows, in reverse order
    /// of the recorded snapshot so dependents are removed before what they
    /// depend on.
    #[must_use]
    pub fn from_changes(changes: Vec<ResourceChange>) -> Self {
        let mut forward: Vec<(usize, Option<usize>, StepOp)> = Vec::new();
        let mut deletes: Vec<(usize, Option<usize>, StepOp)> = Vec::new();

        for (change, resource) in changes.iter().enumerate() {
            match resource {
                ResourceChange::Same { old_index, old, new } => forward.push((
                    change,
                    Some(*old_index),
                    StepOp::Same {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )),
                ResourceChange::Create { new, consumes } => {
                    forward.push((change, *consumes, StepOp::Create { new: new.clone() }));
                }
                ResourceChange::Update {
                    old_index,
                    old,
                    new,
                    changed,
                    provider_call,
                } => forward.push((
                    change,
                    Some(*old_index),
                    StepOp::Update {
                        old: old.clone(),
                        new: new.clone(),
                        changed: changed.clone(),
                        provider_call: *provider_call,
                    },
                )),
                ResourceChange::Delete { old_index, old } => {
                    deletes.push((change, Some(*old_index), StepOp::Delete { old: old.clone() }));
                }
                ResourceChange::Replace(replacement) => {
                    let create = StepOp::CreateReplacement {
                        old: replacement.old.clone(),
                        new: replacement.new.clone(),
                        replace_keys: replacement.replace_keys.clone(),
                        order: replacement.order,
                    };
                    let delete = StepOp::DeleteReplaced {
                        old: replacement.old.clone(),
                        order: replacement.order,
                    };
                    let index = Some(replacement.old_index);
                    match replacement.order {
                        ReplaceOrder::CreateBeforeDelete => {
                            forward.push((change, index, create));
                            deletes.push((change, index, delete));
                        }
                        ReplaceOrder::DeleteBeforeCreate => {
                            forward.push((change, index, delete));
                            forward.push((change, index, create));
                        }
                    }
                }
            }
        }

        deletes.sort_by(|a, b| b.1.cmp(&a.1));

        let steps = forward
            .into_iter()
            .chain(deletes)
            .enumerate()
            .map(|(id, (change, old_index, op))| Step {
                id,
                change,
                urn: changes[change].urn().clone(),
                old_index,
                op,
            })
            .collect();

        Self {
            created_at: Utc::now(),
            changes,
            steps,
        }
    }

    /// Returns the steps carrying out `change`.
    pub fn steps_for(&self, change: usize) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(move |s| s.change == change)
    }

    /// Returns a step by ID.
    #[must_use]
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Returns the number of steps.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns true if any resource changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| !matches!(c, ResourceChange::Same { .. }))
    }

    /// Counts changes by kind.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.kind() {
                StepKind::Same => summary.same += 1,
                StepKind::Create => summary.create += 1,
                StepKind::Update => summary.update += 1,
                StepKind::Replace => summary.replace += 1,
                StepKind::Delete => summary.delete += 1,
                StepKind::CreateReplacement | StepKind::DeleteReplaced => {}
            }
        }
        summary
    }
}
