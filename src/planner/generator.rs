//! Step generation: diffing desired registrations against a snapshot.
//!
//! The generator joins registrations and recorded entries by URN and
//! classifies every resource as same, create, update, replace or delete.
//! Anything that makes the plan unsafe to run (duplicates, unknown
//! references, cycles, protect violations, diff failures) is raised here,
//! before the executor issues a single provider call.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::PlanError;
use crate::program::Registration;
use crate::provider::{DiffResponse, ProviderRegistry};
use crate::resource::{apply_ignore_changes, changed_keys, ResourceState, StackRef, Urn};
use crate::state::Snapshot;

use super::graph::{cycle_error, DependencyGraph};
use super::plan::{Plan, Replacement, ResourceChange};
use super::step::ReplaceOrder;

/// Computes plans for one stack.
#[derive(Debug, Clone, Copy)]
pub struct StepGenerator<'a> {
    stack: &'a StackRef,
    providers: &'a ProviderRegistry,
}

impl<'a> StepGenerator<'a> {
    /// Creates a generator resolving providers from `providers`.
    #[must_use]
    pub const fn new(stack: &'a StackRef, providers: &'a ProviderRegistry) -> Self {
        Self { stack, providers }
    }

    /// Diffs `registrations` against `old` and lays out the plan.
    ///
    /// # Errors
    ///
    /// Returns a [`PlanError`] if the desired graph is invalid, a provider is
    /// missing, a provider diff fails, or a protected resource would be
    /// deleted or replaced.
    pub async fn generate(&self, registrations: &[Registration], old: &Snapshot) -> Result<Plan, PlanError> {
        let desired = self.resolve(registrations)?;

        let live: HashMap<&Urn, usize> = old
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.pending_delete)
            .map(|(i, r)| (&r.urn, i))
            .collect();

        let mut changes = Vec::with_capacity(desired.len() + old.resources.len());
        let mut desired_urns: HashSet<Urn> = HashSet::with_capacity(desired.len());

        for (registration, new) in desired {
            if new.custom {
                self.providers.require(&new.type_token)?;
            }
            desired_urns.insert(new.urn.clone());

            let change = match live.get(&new.urn).copied() {
                None => ResourceChange::Create { new, consumes: None },
                Some(index) if old.resources[index].pending_replacement => ResourceChange::Create {
                    new,
                    consumes: Some(index),
                },
                Some(index) => {
                    self.diff(registration, index, &old.resources[index], new)
                        .await?
                }
            };
            debug!("{} {}", change.kind(), change.urn());
            changes.push(change);
        }

        for (index, recorded) in old.resources.iter().enumerate() {
            if !recorded.pending_delete && desired_urns.contains(&recorded.urn) {
                continue;
            }
            if recorded.protect && !recorded.pending_delete {
                return Err(PlanError::protected(recorded.urn.as_str(), "delete"));
            }
            if recorded.custom && !recorded.retain_on_delete && !recorded.pending_replacement {
                self.providers.require(&recorded.type_token)?;
            }
            debug!("delete {}", recorded.urn);
            changes.push(ResourceChange::Delete {
                old_index: index,
                old: recorded.clone(),
            });
        }

        Ok(Plan::from_changes(changes))
    }

    /// Computes URNs, validates references and orders the registrations.
    fn resolve<'r>(
        &self,
        registrations: &'r [Registration],
    ) -> Result<Vec<(&'r Registration, ResourceState)>, PlanError> {
        let mut index: HashMap<Urn, usize> = HashMap::with_capacity(registrations.len());
        let mut states = Vec::with_capacity(registrations.len());

        for (position, registration) in registrations.iter().enumerate() {
            let urn = registration.urn(self.stack)?;
            if index.insert(urn.clone(), position).is_some() {
                return Err(PlanError::DuplicateUrn {
                    urn: urn.to_string(),
                });
            }
            states.push(desired_state(registration, urn));
        }

        let mut graph = DependencyGraph::new(states.len());
        for (position, state) in states.iter().enumerate() {
            for predecessor in state.predecessors() {
                let Some(&before) = index.get(predecessor) else {
                    return Err(PlanError::UnknownDependency {
                        urn: state.urn.to_string(),
                        dependency: predecessor.to_string(),
                    });
                };
                graph.add_edge(before, position);
            }
        }

        let order = graph
            .topological_order()
            .map_err(|stuck| cycle_error(stuck.iter().map(|&i| &states[i].urn)))?;

        let mut slots: Vec<Option<ResourceState>> = states.into_iter().map(Some).collect();
        Ok(order
            .into_iter()
            .filter_map(|i| slots[i].take().map(|state| (&registrations[i], state)))
            .collect())
    }

    /// Classifies a resource present in both generations.
    async fn diff(
        &self,
        registration: &Registration,
        old_index: usize,
        old: &ResourceState,
        mut new: ResourceState,
    ) -> Result<ResourceChange, PlanError> {
        new.inputs = apply_ignore_changes(&old.inputs, &new.inputs, &registration.ignore_changes);
        new.id.clone_from(&old.id);
        new.outputs.clone_from(&old.outputs);

        if old.custom != new.custom {
            return replacement(old_index, old, new, Vec::new(), registration.delete_before_replace);
        }

        if !new.custom {
            let changed = changed_keys(&old.inputs, &new.inputs);
            return Ok(if changed.is_empty() && !new.metadata_differs(old) {
                ResourceChange::Same {
                    old_index,
                    old: old.clone(),
                    new,
                }
            } else {
                ResourceChange::Update {
                    old_index,
                    old: old.clone(),
                    new,
                    changed,
                    provider_call: false,
                }
            });
        }

        let provider = self.providers.require(&new.type_token)?;
        let response = provider
            .diff(
                &new.type_token,
                old.id.as_deref().unwrap_or_default(),
                &old.inputs,
                &old.outputs,
                &new.inputs,
            )
            .await
            .map_err(|e| PlanError::DiffFailed {
                urn: new.urn.to_string(),
                message: e.message,
            })?;

        match response {
            DiffResponse::Same if new.metadata_differs(old) => Ok(ResourceChange::Update {
                old_index,
                old: old.clone(),
                new,
                changed: Vec::new(),
                provider_call: false,
            }),
            DiffResponse::Same => Ok(ResourceChange::Same {
                old_index,
                old: old.clone(),
                new,
            }),
            DiffResponse::Update { changed } => Ok(ResourceChange::Update {
                old_index,
                old: old.clone(),
                new,
                changed,
                provider_call: true,
            }),
            DiffResponse::Replace {
                replace_keys,
                delete_before_replace,
            } => replacement(
                old_index,
                old,
                new,
                replace_keys,
                registration.delete_before_replace || delete_before_replace,
            ),
        }
    }
}

fn replacement(
    old_index: usize,
    old: &ResourceState,
    mut new: ResourceState,
    replace_keys: Vec<String>,
    delete_first: bool,
) -> Result<ResourceChange, PlanError> {
    if old.protect {
        return Err(PlanError::protected(old.urn.as_str(), "replace"));
    }

    new.id = None;
    new.outputs.clear();
    Ok(ResourceChange::Replace(Replacement {
        old_index,
        old: old.clone(),
        new,
        replace_keys,
        order: if delete_first {
            ReplaceOrder::DeleteBeforeCreate
        } else {
            ReplaceOrder::CreateBeforeDelete
        },
    }))
}

/// Builds the state a registration asks for, before any provider involvement.
fn desired_state(registration: &Registration, urn: Urn) -> ResourceState {
    let mut state = ResourceState::new(urn, registration.custom);
    state.type_token.clone_from(&registration.type_token);
    state.inputs.clone_from(&registration.inputs);
    state.parent.clone_from(&registration.parent);
    state.dependencies.clone_from(&registration.dependencies);
    state.protect = registration.protect;
    state.delete_before_replace = registration.delete_before_replace;
    state.retain_on_delete = registration.retain_on_delete;
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::planner::step::StepKind;
    use crate::provider::testing::{named, FakeProvider};
    use crate::provider::{MockProvider, PluginInfo};
    use crate::state::Manifest;
    use serde_json::json;
    use std::sync::Arc;

    fn stack() -> StackRef {
        StackRef::new("web", "dev")
    }

    fn registry(provider: FakeProvider) -> ProviderRegistry {
        ProviderRegistry::new().with_provider("fake", Arc::new(provider))
    }

    fn bucket(name: &str) -> Registration {
        Registration::custom("fake:index:Bucket", name).with_inputs(named(name, json!({"size": 1})))
    }

    fn recorded(registration: &Registration) -> ResourceState {
        let mut state = desired_state(registration, registration.urn(&stack()).unwrap());
        state.id = Some(format!("{}-id", registration.name));
        state.outputs = state.inputs.clone();
        state
    }

    fn snapshot(resources: Vec<ResourceState>) -> Snapshot {
        Snapshot::new(Manifest::default(), resources)
    }

    async fn generate(providers: &ProviderRegistry, desired: &[Registration], old: &Snapshot) -> Result<Plan, PlanError> {
        let stack = stack();
        StepGenerator::new(&stack, providers).generate(desired, old).await
    }

    fn kinds(plan: &Plan) -> Vec<(StepKind, String)> {
        plan.changes
            .iter()
            .map(|c| (c.kind(), c.urn().name().to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_classifies_every_change_kind() {
        let providers = registry(FakeProvider::new().with_force_new("zone"));
        let same = bucket("same");
        let resized = bucket("resized");
        let moved = bucket("moved");
        let gone = bucket("gone");
        let old = snapshot(vec![recorded(&same), recorded(&resized), recorded(&moved), recorded(&gone)]);

        let desired = vec![
            same.clone(),
            resized.clone().with_input("size", json!(2)),
            moved.clone().with_input("zone", json!("b")),
            bucket("fresh"),
        ];
        let plan = generate(&providers, &desired, &old).await.unwrap();

        assert_eq!(
            kinds(&plan),
            vec![
                (StepKind::Same, String::from("same")),
                (StepKind::Update, String::from("resized")),
                (StepKind::Replace, String::from("moved")),
                (StepKind::Create, String::from("fresh")),
                (StepKind::Delete, String::from("gone")),
            ]
        );
        match &plan.changes[1] {
            ResourceChange::Update {
                changed,
                provider_call,
                new,
                ..
            } => {
                assert_eq!(changed, &vec![String::from("size")]);
                assert!(provider_call);
                assert_eq!(new.id.as_deref(), Some("resized-id"));
            }
            other => panic!("expected update, got {other:?}"),
        }
        match &plan.changes[2] {
            ResourceChange::Replace(replacement) => {
                assert_eq!(replacement.order, ReplaceOrder::CreateBeforeDelete);
                assert_eq!(replacement.replace_keys, vec![String::from("zone")]);
                assert!(replacement.new.id.is_none());
            }
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_processing_order_follows_dependencies() {
        let providers = registry(FakeProvider::new());
        let network = bucket("network");
        let network_urn = network.urn(&stack()).unwrap();
        let server = bucket("server").depends_on(network_urn);

        let plan = generate(&providers, &[server, network], &Snapshot::empty()).await.unwrap();
        let names: Vec<&str> = plan.steps.iter().map(|s| s.urn.name()).collect();
        assert_eq!(names, vec!["network", "server"]);
    }

    #[tokio::test]
    async fn test_invalid_graphs_are_rejected() {
        let providers = registry(FakeProvider::new());

        let err = generate(&providers, &[bucket("a"), bucket("a")], &Snapshot::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateUrn { .. }));

        let ghost = bucket("ghost").urn(&stack()).unwrap();
        let err = generate(&providers, &[bucket("a").depends_on(ghost)], &Snapshot::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownDependency { .. }));

        let a_urn = bucket("a").urn(&stack()).unwrap();
        let b_urn = bucket("b").urn(&stack()).unwrap();
        let cyclic = [bucket("a").depends_on(b_urn), bucket("b").depends_on(a_urn)];
        let err = generate(&providers, &cyclic, &Snapshot::empty()).await.unwrap_err();
        assert!(matches!(err, PlanError::CyclicDependency { .. }));

        let unknown = Registration::custom("aws:s3:Bucket", "logs");
        let err = generate(&providers, &[unknown], &Snapshot::empty()).await.unwrap_err();
        assert!(matches!(err, PlanError::MissingProvider { .. }));
    }

    #[tokio::test]
    async fn test_protect_blocks_delete_and_replace() {
        let providers = registry(FakeProvider::new().with_force_new("zone"));
        let eternal = bucket("eternal").protect(true);
        let old = snapshot(vec![recorded(&eternal)]);

        let err = generate(&providers, &[], &old).await.unwrap_err();
        assert!(matches!(&err, PlanError::ProtectedResource { operation, .. } if operation == "delete"));

        let moved = eternal.clone().with_input("zone", json!("b"));
        let err = generate(&providers, &[moved], &old).await.unwrap_err();
        assert!(matches!(&err, PlanError::ProtectedResource { operation, .. } if operation == "replace"));

        // Lifting protection is a state-only update.
        let plan = generate(&providers, &[eternal.protect(false)], &old).await.unwrap();
        assert!(matches!(
            &plan.changes[0],
            ResourceChange::Update { provider_call: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_ignore_changes_masks_inputs() {
        let providers = registry(FakeProvider::new());
        let base = bucket("tagged").with_input("tags", json!({"owner": "ops"}));
        let old = snapshot(vec![recorded(&base)]);

        let retagged = base
            .with_input("tags", json!({"owner": "dev"}))
            .ignore_changes(["tags"]);
        let plan = generate(&providers, &[retagged], &old).await.unwrap();

        match &plan.changes[0] {
            ResourceChange::Same { new, .. } => assert_eq!(new.inputs["tags"], json!({"owner": "ops"})),
            other => panic!("expected same, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pending_entries_from_interrupted_runs() {
        let providers = registry(FakeProvider::new());
        let a = bucket("a");
        let mut superseded = recorded(&a);
        superseded.pending_delete = true;
        let b = bucket("b");
        let mut half_replaced = recorded(&b);
        half_replaced.pending_replacement = true;

        let old = snapshot(vec![recorded(&a), superseded, half_replaced]);
        let plan = generate(&providers, &[a, b], &old).await.unwrap();

        assert_eq!(
            kinds(&plan),
            vec![
                (StepKind::Same, String::from("a")),
                (StepKind::Create, String::from("b")),
                (StepKind::Delete, String::from("a")),
            ]
        );
        assert!(matches!(plan.changes[1], ResourceChange::Create { consumes: Some(2), .. }));
    }

    #[tokio::test]
    async fn test_delete_before_replace_from_registration() {
        let providers = registry(FakeProvider::new().with_force_new("zone"));
        let db = bucket("db");
        let old = snapshot(vec![recorded(&db)]);

        let moved = db.with_input("zone", json!("b")).delete_before_replace(true);
        let plan = generate(&providers, &[moved], &old).await.unwrap();

        let layout: Vec<StepKind> = plan.steps.iter().map(|s| s.kind()).collect();
        assert_eq!(layout, vec![StepKind::DeleteReplaced, StepKind::CreateReplacement]);
    }

    #[tokio::test]
    async fn test_component_flip_is_replace() {
        let providers = registry(FakeProvider::new());
        let site = bucket("site");
        let old = snapshot(vec![recorded(&site)]);

        let component = Registration::component("fake:index:Bucket", "site");
        let plan = generate(&providers, &[component], &old).await.unwrap();
        assert_eq!(plan.changes[0].kind(), StepKind::Replace);
    }

    #[tokio::test]
    async fn test_diff_failure_is_a_planning_error() {
        let mut mock = MockProvider::new();
        mock.expect_plugin().returning(|| PluginInfo {
            name: String::from("mock"),
            version: String::from("0.1.0"),
        });
        mock.expect_diff()
            .returning(|_, _, _, _, _| Err(ProviderError::new("api unreachable")));
        let providers = ProviderRegistry::new().with_provider("fake", Arc::new(mock));

        let a = bucket("a");
        let old = snapshot(vec![recorded(&a)]);
        let err = generate(&providers, &[a], &old).await.unwrap_err();

        assert!(matches!(err, PlanError::DiffFailed { message, .. } if message == "api unreachable"));
    }
}
