//! Dependency graphs over registrations and steps.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use crate::error::PlanError;
use crate::resource::Urn;

use super::plan::Plan;
use super::step::{ReplaceOrder, StepId, StepOp};

/// Directed graph over nodes `0..n`, with a stable topological order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    successors: Vec<BTreeSet<usize>>,
    in_degree: Vec<usize>,
}

impl DependencyGraph {
    /// Creates a graph with `nodes` nodes and no edges.
    #[must_use]
    pub fn new(nodes: usize) -> Self {
        Self {
            successors: vec![BTreeSet::new(); nodes],
            in_degree: vec![0; nodes],
        }
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Adds the edge `before -> after`. Self-loops and duplicates are ignored.
    pub fn add_edge(&mut self, before: usize, after: usize) {
        if before != after && self.successors[before].insert(after) {
            self.in_degree[after] += 1;
        }
    }

    /// Returns the nodes that must wait for `node`.
    pub fn successors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.successors[node].iter().copied()
    }

    /// Returns the number of predecessors of every node.
    #[must_use]
    pub fn in_degrees(&self) -> Vec<usize> {
        self.in_degree.clone()
    }

    /// Kahn's algorithm, always taking the lowest ready node first.
    ///
    /// # Errors
    ///
    /// Returns the nodes left unordered if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degree = self.in_degrees();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| Reverse(n))
            .collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for next in self.successors(node) {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == self.len() {
            Ok(order)
        } else {
            Err(in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| n)
                .collect())
        }
    }
}

/// Builds the cycle error naming the given resources.
pub(crate) fn cycle_error<'a>(urns: impl IntoIterator<Item = &'a Urn>) -> PlanError {
    let cycle: Vec<&str> = urns.into_iter().map(Urn::as_str).collect();
    PlanError::CyclicDependency {
        cycle: cycle.join(", "),
    }
}

/// Builds the step graph the executor schedules over.
///
/// # Errors
///
/// Returns [`PlanError::CyclicDependency`] if the steps cannot be ordered.
pub fn schedule_graph(plan: &Plan) -> Result<DependencyGraph, PlanError> {
    let mut graph = DependencyGraph::new(plan.steps.len());

    let defining: HashMap<&Urn, StepId> = plan
        .steps
        .iter()
        .filter_map(|s| s.new_state().map(|n| (&n.urn, s.id)))
        .collect();
    let deletes: Vec<_> = plan.steps.iter().filter(|s| s.is_delete()).collect();

    for step in &plan.steps {
        if let Some(new) = step.new_state() {
            for predecessor in new.predecessors() {
                if let Some(&before) = defining.get(predecessor) {
                    graph.add_edge(before, step.id);
                }
            }
        }

        match &step.op {
            StepOp::CreateReplacement { order, .. } | StepOp::DeleteReplaced { order, .. } => {
                let partner = plan
                    .steps_for(step.change)
                    .find(|s| s.id != step.id)
                    .map(|s| s.id);
                let runs_first = matches!(step.op, StepOp::CreateReplacement { .. })
                    == (*order == ReplaceOrder::CreateBeforeDelete);
                if let Some(partner) = partner {
                    if runs_first {
                        graph.add_edge(step.id, partner);
                    } else {
                        graph.add_edge(partner, step.id);
                    }
                }
            }
            _ => {}
        }
    }

    for delete in &deletes {
        let Some(target) = delete.old() else {
            continue;
        };

        // Recorded dependents are deleted first.
        for other in &deletes {
            if other.id != delete.id && other.old().is_some_and(|o| o.depends_on(&target.urn)) {
                graph.add_edge(other.id, delete.id);
            }
        }

        // Resources that still refer to the target, in either generation,
        // must settle before it disappears. A delete-before-create
        // replacement precedes its own dependents instead.
        if delete.replace_order() == Some(ReplaceOrder::DeleteBeforeCreate) {
            continue;
        }
        for step in plan.steps.iter().filter(|s| !s.is_delete()) {
            let refers = step.new_state().is_some_and(|n| n.depends_on(&target.urn))
                || step.old().is_some_and(|o| o.depends_on(&target.urn));
            if refers {
                graph.add_edge(step.id, delete.id);
            }
        }
    }

    graph.topological_order().map_err(|stuck| {
        cycle_error(stuck.iter().filter_map(|&id| plan.step(id)).map(|s| &s.urn))
    })?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan::{Replacement, ResourceChange};
    use crate::resource::{ResourceState, StackRef};

    fn state(name: &str, deps: &[&ResourceState]) -> ResourceState {
        let urn = StackRef::new("web", "dev")
            .urn(None, "echo:index:Bucket", name)
            .unwrap();
        let mut state = ResourceState::new(urn, true);
        state.dependencies = deps.iter().map(|d| d.urn.clone()).collect();
        state
    }

    #[test]
    fn test_stable_topological_order() {
        let mut graph = DependencyGraph::new(4);
        graph.add_edge(3, 0);
        graph.add_edge(2, 1);
        graph.add_edge(2, 1);

        assert_eq!(graph.topological_order().unwrap(), vec![2, 1, 3, 0]);
        assert_eq!(graph.in_degrees(), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_cycle_reports_stuck_nodes() {
        let mut graph = DependencyGraph::new(3);
        graph.add_edge(0, 1);
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);

        assert_eq!(graph.topological_order().unwrap_err(), vec![1, 2]);
    }

    #[test]
    fn test_creates_follow_dependencies_and_deletes_follow_dependents() {
        let a = state("a", &[]);
        let b = state("b", &[&a]);
        let plan = Plan::from_changes(vec![
            ResourceChange::Create {
                new: a.clone(),
                consumes: None,
            },
            ResourceChange::Create {
                new: b.clone(),
                consumes: None,
            },
            ResourceChange::Delete {
                old_index: 0,
                old: state("x", &[]),
            },
            ResourceChange::Delete {
                old_index: 1,
                old: state("y", &[&state("x", &[])]),
            },
        ]);

        let graph = schedule_graph(&plan).unwrap();
        // Steps: 0 create a, 1 create b, 2 delete y, 3 delete x.
        assert_eq!(graph.successors(0).collect::<Vec<_>>(), vec![1]);
        assert_eq!(graph.successors(2).collect::<Vec<_>>(), vec![3]);
        assert_eq!(graph.in_degrees(), vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_create_before_delete_replacement_waits_for_dependents() {
        let a = state("a", &[]);
        let b = state("b", &[&a]);
        let plan = Plan::from_changes(vec![
            ResourceChange::Replace(Replacement {
                old_index: 0,
                old: a.clone(),
                new: a.clone(),
                replace_keys: vec![],
                order: ReplaceOrder::CreateBeforeDelete,
            }),
            ResourceChange::Same {
                old_index: 1,
                old: b.clone(),
                new: b,
            },
        ]);

        let graph = schedule_graph(&plan).unwrap();
        // Steps: 0 create-replacement a, 1 same b, 2 delete-replaced a.
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.in_degrees()[2], 2);
    }

    #[test]
    fn test_delete_before_create_replacement_precedes_its_creation() {
        let a = state("a", &[]);
        let plan = Plan::from_changes(vec![ResourceChange::Replace(Replacement {
            old_index: 0,
            old: a.clone(),
            new: a,
            replace_keys: vec![],
            order: ReplaceOrder::DeleteBeforeCreate,
        })]);

        let graph = schedule_graph(&plan).unwrap();
        // Steps: 0 delete-replaced a, 1 create-replacement a.
        assert_eq!(graph.successors(0).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_cyclic_steps_are_rejected() {
        let a_urn = state("a", &[]).urn;
        let mut a = state("a", &[]);
        let b = state("b", &[&a]);
        a.dependencies.push(b.urn.clone());
        assert_eq!(a.urn, a_urn);

        let plan = Plan::from_changes(vec![
            ResourceChange::Create {
                new: a,
                consumes: None,
            },
            ResourceChange::Create {
                new: b,
                consumes: None,
            },
        ]);

        assert!(matches!(
            schedule_graph(&plan),
            Err(PlanError::CyclicDependency { .. })
        ));
    }
}
