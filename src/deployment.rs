//! Deployment orchestration.
//!
//! A [`Deployment`] drives one end-to-end run for a stack: it gathers the
//! program's registrations, locks the stack, loads the recorded snapshot,
//! plans, claims the stack, executes, saves the final snapshot and unlocks.

use std::fmt;
use std::sync::Arc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::DeploymentContext;
use crate::error::Result;
use crate::planner::{
    ExecutionReport, Plan, PlanSummary, ResourceChange, StepExecutor, StepGenerator, StepKind,
    StepStatus,
};
use crate::program::{DesiredStateSource, Registration};
use crate::resource::Urn;
use crate::state::{Manifest, Snapshot, SnapshotStore};

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResourceOutcome {
    /// Already converged.
    Same,
    /// Created.
    Created,
    /// Updated in place.
    Updated,
    /// Deleted.
    Deleted,
    /// Replaced.
    Replaced,
    /// A provider operation failed.
    Failed {
        /// Provider message.
        message: String,
    },
    /// Not attempted.
    Skipped,
}

impl fmt::Display for ResourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Same => write!(f, "same"),
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
            Self::Replaced => write!(f, "replaced"),
            Self::Failed { message } => write!(f, "failed: {message}"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome for one resource of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceResult {
    /// Resource.
    pub urn: Urn,
    /// Outcome.
    #[serde(flatten)]
    pub outcome: ResourceOutcome,
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Every step succeeded.
    Succeeded,
    /// At least one step failed.
    Failed,
    /// Cancelled or timed out before every step ran.
    Cancelled,
}

/// Result of a deployment run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    /// Per-resource outcomes, in plan order.
    pub resources: Vec<ResourceResult>,
    /// Snapshot after the run.
    #[serde(skip)]
    pub snapshot: Snapshot,
    /// Overall status.
    pub status: DeploymentStatus,
    /// Planned changes by kind.
    pub summary: PlanSummary,
}

impl DeploymentResult {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }

    /// Returns the outcome recorded for `urn`.
    #[must_use]
    pub fn outcome(&self, urn: &Urn) -> Option<&ResourceOutcome> {
        self.resources
            .iter()
            .find(|r| &r.urn == urn)
            .map(|r| &r.outcome)
    }

    /// Returns the resources whose provider operations failed.
    pub fn failures(&self) -> impl Iterator<Item = &ResourceResult> {
        self.resources
            .iter()
            .filter(|r| matches!(r.outcome, ResourceOutcome::Failed { .. }))
    }

    fn unchanged(plan: &Plan, snapshot: Snapshot) -> Self {
        Self {
            resources: plan
                .changes
                .iter()
                .map(|c| ResourceResult {
                    urn: c.urn().clone(),
                    outcome: ResourceOutcome::Same,
                })
                .collect(),
            snapshot,
            status: DeploymentStatus::Succeeded,
            summary: plan.summary(),
        }
    }

    fn cancelled(plan: &Plan, snapshot: Snapshot) -> Self {
        Self {
            resources: plan
                .changes
                .iter()
                .map(|c| ResourceResult {
                    urn: c.urn().clone(),
                    outcome: ResourceOutcome::Skipped,
                })
                .collect(),
            snapshot,
            status: DeploymentStatus::Cancelled,
            summary: plan.summary(),
        }
    }

    fn from_report(plan: &Plan, report: &ExecutionReport, snapshot: Snapshot) -> Self {
        let resources = plan
            .changes
            .iter()
            .enumerate()
            .map(|(index, change)| ResourceResult {
                urn: change.urn().clone(),
                outcome: change_outcome(plan, report, index, change),
            })
            .collect();

        let status = if report.cancelled {
            DeploymentStatus::Cancelled
        } else if report.failed() > 0 {
            DeploymentStatus::Failed
        } else {
            DeploymentStatus::Succeeded
        };

        Self {
            resources,
            snapshot,
            status,
            summary: plan.summary(),
        }
    }
}

/// Folds the statuses of a change's steps into one outcome.
fn change_outcome(plan: &Plan, report: &ExecutionReport, index: usize, change: &ResourceChange) -> ResourceOutcome {
    let mut all_succeeded = true;
    for step in plan.steps_for(index) {
        match &report.records[step.id].status {
            StepStatus::Succeeded => {}
            StepStatus::Failed { message } => {
                return ResourceOutcome::Failed {
                    message: message.clone(),
                };
            }
            StepStatus::Skipped => all_succeeded = false,
        }
    }

    if !all_succeeded {
        return ResourceOutcome::Skipped;
    }
    match change.kind() {
        StepKind::Same => ResourceOutcome::Same,
        StepKind::Create => ResourceOutcome::Created,
        StepKind::Update => ResourceOutcome::Updated,
        StepKind::Delete => ResourceOutcome::Deleted,
        StepKind::Replace | StepKind::CreateReplacement | StepKind::DeleteReplaced => {
            ResourceOutcome::Replaced
        }
    }
}

impl fmt::Display for DeploymentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            DeploymentStatus::Succeeded => "succeeded",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Cancelled => "cancelled",
        };
        writeln!(f, "Deployment {status}:")?;
        writeln!(f, "  Created: {}", self.summary.create)?;
        writeln!(f, "  Updated: {}", self.summary.update)?;
        writeln!(f, "  Replaced: {}", self.summary.replace)?;
        writeln!(f, "  Deleted: {}", self.summary.delete)?;
        writeln!(f, "  Unchanged: {}", self.summary.same)?;

        let mut failures = self.failures().peekable();
        if failures.peek().is_some() {
            writeln!(f, "  Errors:")?;
            for failure in failures {
                writeln!(f, "    - {}: {}", failure.urn, failure.outcome)?;
            }
        }

        Ok(())
    }
}

/// Runs deployments for one stack.
#[derive(Debug, Clone)]
pub struct Deployment {
    ctx: DeploymentContext,
    store: Arc<SnapshotStore>,
}

impl Deployment {
    /// Creates a deployment over `store`.
    #[must_use]
    pub const fn new(ctx: DeploymentContext, store: Arc<SnapshotStore>) -> Self {
        Self { ctx, store }
    }

    /// Returns the run context.
    #[must_use]
    pub const fn context(&self) -> &DeploymentContext {
        &self.ctx
    }

    /// Plans a run without touching providers' resources or the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded, the source fails or
    /// planning fails.
    pub async fn preview(&self, source: &mut dyn DesiredStateSource) -> Result<Plan> {
        let old = self.store.load_or_empty(&self.ctx.stack).await?;
        let desired = self.desired(source).await?;
        let plan = self.generator().generate(&desired, &old).await?;
        info!("Preview for {}: {} changes", self.ctx.stack, plan.summary().total_changes());
        Ok(plan)
    }

    /// Converges the stack to the registrations `source` yields.
    ///
    /// The stack stays locked from before the snapshot is loaded until the
    /// final snapshot is saved, whether the run succeeds or not.
    ///
    /// # Errors
    ///
    /// Returns a planning error before any mutation, a conflict error if
    /// another deployment holds the stack, or a storage error. Provider
    /// failures are reported in the result instead.
    pub async fn run(&self, source: &mut dyn DesiredStateSource) -> Result<DeploymentResult> {
        info!("Starting deployment for {}", self.ctx.stack);
        let desired = self.desired(source).await?;
        self.locked(&desired).await
    }

    /// Deletes every resource of the stack, the root included.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run); protected resources fail planning.
    pub async fn destroy(&self) -> Result<DeploymentResult> {
        info!("Destroying {}", self.ctx.stack);
        self.locked(&[]).await
    }

    fn generator(&self) -> StepGenerator<'_> {
        StepGenerator::new(&self.ctx.stack, &self.ctx.providers)
    }

    /// Drains `source`, parenting top-level resources under the stack root.
    async fn desired(&self, source: &mut dyn DesiredStateSource) -> Result<Vec<Registration>> {
        let root_urn = self.ctx.stack.root_urn()?;
        let registrations = source.collect().await?;
        debug!("Program registered {} resources", registrations.len());

        let mut desired = Vec::with_capacity(registrations.len() + 1);
        desired.push(Registration::root(&self.ctx.stack));
        for registration in registrations {
            if registration.is_root() {
                continue;
            }
            if registration.parent.is_none() {
                desired.push(registration.with_parent(root_urn.clone()));
            } else {
                desired.push(registration);
            }
        }
        Ok(desired)
    }

    /// Runs [`converge`](Self::converge) under the stack's deployment lock.
    async fn locked(&self, desired: &[Registration]) -> Result<DeploymentResult> {
        let stack = &self.ctx.stack;
        let lock = self.store.lock(stack, self.ctx.options.lock_ttl()).await?;

        let converged = self.converge(desired).await;
        let released = self.store.unlock(stack, &lock).await;

        let result = converged?;
        released?;
        Ok(result)
    }

    async fn converge(&self, desired: &[Registration]) -> Result<DeploymentResult> {
        let old = self.store.load_or_empty(&self.ctx.stack).await?;
        let plan = self.generator().generate(desired, &old).await?;
        let summary = plan.summary();
        info!(
            "Plan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            summary.create, summary.update, summary.replace, summary.delete, summary.same
        );

        if !plan.has_changes() {
            info!("No changes required; {} is converged", self.ctx.stack);
            return Ok(DeploymentResult::unchanged(&plan, old));
        }

        if self.ctx.is_cancelled() {
            warn!("Deployment of {} was cancelled before it started", self.ctx.stack);
            return Ok(DeploymentResult::cancelled(&plan, old));
        }

        // A writer that bypassed the lock now fails its next write.
        self.store.save(&self.ctx.stack, &old).await?;

        let manifest = Manifest::new(self.ctx.providers.plugins());
        let report = StepExecutor::new(self.ctx.clone(), Arc::clone(&self.store))
            .execute(&plan, &old, manifest.clone())
            .await?;

        let snapshot = Snapshot::new(manifest, report.snapshot.resources.clone());
        self.store.save(&self.ctx.stack, &snapshot).await?;

        let result = DeploymentResult::from_report(&plan, &report, snapshot);
        match result.status {
            DeploymentStatus::Succeeded => info!("Deployment of {} succeeded", self.ctx.stack),
            DeploymentStatus::Failed => warn!(
                "Deployment of {} finished with {} failed steps",
                self.ctx.stack,
                report.failed()
            ),
            DeploymentStatus::Cancelled => warn!("Deployment of {} was cancelled", self.ctx.stack),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConvergeError, PlanError};
    use crate::program::StaticSource;
    use crate::provider::testing::{named, FakeProvider};
    use crate::provider::ProviderRegistry;
    use crate::resource::StackRef;
    use crate::state::InMemoryBackend;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn stack() -> StackRef {
        StackRef::new("web", "dev")
    }

    fn bucket(name: &str) -> Registration {
        Registration::custom("fake:index:Bucket", name).with_inputs(named(name, json!({"size": 1})))
    }

    fn urn(name: &str) -> Urn {
        bucket(name)
            .with_parent(stack().root_urn().unwrap())
            .urn(&stack())
            .unwrap()
    }

    fn deployment(provider: &FakeProvider, store: Arc<SnapshotStore>) -> Deployment {
        let providers = ProviderRegistry::new().with_provider("fake", Arc::new(provider.clone()));
        let ctx = DeploymentContext::new(stack(), Arc::new(providers)).with_parallelism(4);
        Deployment::new(ctx, store)
    }

    fn memory_store() -> Arc<SnapshotStore> {
        Arc::new(SnapshotStore::new(Arc::new(InMemoryBackend::new())))
    }

    async fn run(deployment: &Deployment, registrations: Vec<Registration>) -> Result<DeploymentResult> {
        deployment.run(&mut StaticSource::new(registrations)).await
    }

    #[tokio::test]
    async fn test_protected_resource_lifecycle() {
        let store = memory_store();
        let deployment = deployment(&FakeProvider::new(), Arc::clone(&store));
        let eternal = bucket("eternal").protect(true);

        // Declared protected.
        let result = run(&deployment, vec![eternal.clone()]).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.snapshot.resources.len(), 2);
        assert!(result.snapshot.find(&urn("eternal")).unwrap().protect);

        // Updating inputs is allowed.
        let resized = eternal.clone().with_input("size", json!(2));
        let result = run(&deployment, vec![resized.clone()]).await.unwrap();
        assert_eq!(result.outcome(&urn("eternal")), Some(&ResourceOutcome::Updated));
        assert_eq!(result.snapshot.resources.len(), 2);
        assert!(result.snapshot.find(&urn("eternal")).unwrap().protect);

        // Removing it is refused before anything is written.
        let writes = store.writes();
        let err = run(&deployment, vec![]).await.unwrap_err();
        assert!(matches!(err, ConvergeError::Plan(PlanError::ProtectedResource { .. })));
        assert_eq!(store.writes(), writes);
        let recorded = store.load(&stack()).await.unwrap();
        assert_eq!(recorded.resources.len(), 2);
        assert!(recorded.find(&urn("eternal")).unwrap().protect);

        // Lifting protection is a state-only update.
        let result = run(&deployment, vec![resized.protect(false)]).await.unwrap();
        assert_eq!(result.outcome(&urn("eternal")), Some(&ResourceOutcome::Updated));
        assert_eq!(result.snapshot.resources.len(), 2);
        assert!(!result.snapshot.find(&urn("eternal")).unwrap().protect);

        // Now it can go.
        let result = run(&deployment, vec![]).await.unwrap();
        assert_eq!(result.outcome(&urn("eternal")), Some(&ResourceOutcome::Deleted));
        assert_eq!(result.snapshot.resources.len(), 1);
        assert_eq!(result.snapshot.resources[0].urn, stack().root_urn().unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let provider = FakeProvider::new();
        let store = memory_store();
        let deployment = deployment(&provider, Arc::clone(&store));
        let program = vec![bucket("a"), bucket("b").depends_on(urn("a"))];

        let first = run(&deployment, program.clone()).await.unwrap();
        let writes = store.writes();
        provider.clear();

        let second = run(&deployment, program).await.unwrap();

        assert!(second.is_success());
        assert!(second.resources.iter().all(|r| r.outcome == ResourceOutcome::Same));
        assert_eq!(store.writes(), writes);
        assert!(provider.events().is_empty());
        assert_eq!(second.snapshot.resources, first.snapshot.resources);
    }

    #[tokio::test]
    async fn test_failure_is_contained_and_checkpointed() {
        let provider = FakeProvider::new().failing("b").with_partial_on_failure();
        let store = memory_store();
        let deployment = deployment(&provider, Arc::clone(&store));
        let program = vec![bucket("a"), bucket("b"), bucket("c").depends_on(urn("b"))];

        let result = run(&deployment, program.clone()).await.unwrap();

        assert_eq!(result.status, DeploymentStatus::Failed);
        assert_eq!(result.outcome(&urn("a")), Some(&ResourceOutcome::Created));
        assert!(matches!(result.outcome(&urn("b")), Some(ResourceOutcome::Failed { .. })));
        assert_eq!(result.outcome(&urn("c")), Some(&ResourceOutcome::Skipped));
        assert_eq!(result.failures().count(), 1);

        let recorded = store.load(&stack()).await.unwrap();
        assert_eq!(recorded.find(&urn("b")).unwrap().id.as_deref(), Some("b-partial"));
        assert!(recorded.find(&urn("c")).is_none());

        // The next run picks up where this one stopped.
        provider.heal("b");
        provider.clear();
        let retried = run(&deployment, program).await.unwrap();
        assert!(retried.is_success());
        assert_eq!(retried.outcome(&urn("a")), Some(&ResourceOutcome::Same));
        assert_eq!(retried.outcome(&urn("c")), Some(&ResourceOutcome::Created));
    }

    #[tokio::test]
    async fn test_deployment_started_mid_run_fails_before_touching_providers() {
        let backend = Arc::new(InMemoryBackend::new());
        let provider = FakeProvider::new().with_delay(Duration::from_millis(100));
        let first = deployment(&provider, Arc::new(SnapshotStore::new(backend.clone())));
        let second = deployment(&provider, Arc::new(SnapshotStore::new(backend.clone())));

        let late = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            run(&second, vec![bucket("a")]).await
        };
        let (a, b) = tokio::join!(run(&first, vec![bucket("a")]), late);

        let result = assert_ok!(a);
        assert!(result.is_success());
        let err = assert_err!(b);
        assert!(err.is_conflict());
        assert_eq!(provider.completed(), vec!["create:a"]);

        // The lock is gone once the winner finishes.
        let store = Arc::new(SnapshotStore::new(backend));
        assert!(store.lock_info(&stack()).await.unwrap().is_none());
        provider.clear();
        let rerun = run(&deployment(&provider, store), vec![bucket("a")]).await.unwrap();
        assert!(rerun.resources.iter().all(|r| r.outcome == ResourceOutcome::Same));
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_planning() {
        let store = memory_store();
        let deployment = deployment(&FakeProvider::new(), Arc::clone(&store));
        let unknown = Registration::custom("aws:s3:Bucket", "logs");

        assert!(run(&deployment, vec![unknown]).await.is_err());

        assert!(store.lock_info(&stack()).await.unwrap().is_none());
        assert!(run(&deployment, vec![bucket("a")]).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let provider = FakeProvider::new();
        let store = memory_store();
        let deployment = deployment(&provider, Arc::clone(&store));

        let plan = deployment
            .preview(&mut StaticSource::new(vec![bucket("a")]))
            .await
            .unwrap();

        assert_eq!(plan.summary().create, 2);
        assert_eq!(store.writes(), 0);
        assert!(provider.events().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let provider = FakeProvider::new();
        let store = memory_store();
        let deployment = deployment(&provider, Arc::clone(&store));
        run(&deployment, vec![bucket("a"), bucket("b").depends_on(urn("a"))])
            .await
            .unwrap();
        provider.clear();

        let result = deployment.destroy().await.unwrap();

        assert!(result.is_success());
        assert!(result.snapshot.is_empty());
        assert_eq!(provider.completed(), vec!["delete:b", "delete:a"]);
        assert!(store.load(&stack()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_parents_are_kept() {
        let provider = FakeProvider::new();
        let deployment = deployment(&provider, memory_store());
        let group = Registration::component("fake:index:Group", "group");
        let group_urn = group
            .clone()
            .with_parent(stack().root_urn().unwrap())
            .urn(&stack())
            .unwrap();
        let child = bucket("child").with_parent(group_urn.clone());
        let child_urn = child.urn(&stack()).unwrap();

        let result = run(&deployment, vec![group, child]).await.unwrap();

        assert_eq!(result.snapshot.resources.len(), 3);
        assert_eq!(
            result.snapshot.find(&child_urn).unwrap().parent.as_ref(),
            Some(&group_urn)
        );
        assert_eq!(provider.completed(), vec!["create:child"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_cancelled() {
        let provider = FakeProvider::new();
        let store = memory_store();
        let deployment = deployment(&provider, Arc::clone(&store));
        deployment.context().cancellation_handle().cancel();

        let result = run(&deployment, vec![bucket("a")]).await.unwrap();

        assert_eq!(result.status, DeploymentStatus::Cancelled);
        assert!(result.resources.iter().all(|r| r.outcome == ResourceOutcome::Skipped));
        assert!(result.snapshot.is_empty());
        assert_eq!(store.writes(), 0);
        assert!(provider.events().is_empty());
        assert!(store.lock_info(&stack()).await.unwrap().is_none());
    }
}
