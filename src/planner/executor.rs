//! Step execution.
//!
//! The executor runs a plan over a bounded pool of worker tasks. Steps become
//! ready when every predecessor in the step graph has succeeded; the lowest
//! ready step starts first, so a run with one worker is deterministic.
//!
//! Each worker performs its provider call, then takes the journal lock,
//! applies the step's effect to the in-memory journal and checkpoints the
//! resulting snapshot before releasing its dependents. A failed step records
//! whatever partial state the provider reported and its dependents never
//! become ready; independent branches carry on. Cancellation and timeouts
//! stop new starts while in-flight steps finish. A checkpoint failure does
//! the same and is then returned as the run's error.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::DeploymentContext;
use crate::error::{ConvergeError, Result};
use crate::provider::{Provider, ProviderRegistry};
use crate::resource::{ResourceState, StackRef, Urn};
use crate::state::{Manifest, Snapshot, SnapshotStore};

use super::graph::schedule_graph;
use super::plan::Plan;
use super::step::{ReplaceOrder, Step, StepId, StepKind, StepOp};

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// The step completed.
    Succeeded,
    /// The provider operation failed.
    Failed {
        /// Provider message.
        message: String,
    },
    /// The step never started: a predecessor failed or the run was stopped.
    Skipped,
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Step ID.
    pub id: StepId,
    /// Resource acted on.
    pub urn: Urn,
    /// Step kind.
    pub kind: StepKind,
    /// Outcome.
    pub status: StepStatus,
}

/// Result of executing a plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// One record per step, indexed by step ID.
    pub records: Vec<StepRecord>,
    /// True if cancellation or the timeout stopped the run early.
    pub cancelled: bool,
    /// The snapshot reflecting every completed step.
    pub snapshot: Snapshot,
}

impl ExecutionReport {
    /// Number of failed steps.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, StepStatus::Failed { .. }))
    }

    /// Number of skipped steps.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|s| *s == StepStatus::Skipped)
    }

    /// Number of successful steps.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|s| *s == StepStatus::Succeeded)
    }

    fn count(&self, predicate: impl Fn(&StepStatus) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.status)).count()
    }
}

/// Effect of a finished step on the journal.
#[derive(Debug)]
enum Mutation {
    None,
    /// Record a new state, consuming a recorded entry if given.
    Append {
        new: ResourceState,
        consume: Option<usize>,
    },
    /// Record a replacement while the recorded entry awaits deletion.
    AppendAndMark { new: ResourceState, mark: usize },
    Remove(usize),
    /// The recorded entry was deleted ahead of its replacement.
    MarkPendingReplacement(usize),
}

/// In-memory view of the snapshot as steps complete.
///
/// Completed states are listed first, in completion order, followed by the
/// recorded entries not yet consumed, in their original order. Since a step
/// only completes after its dependencies, this keeps the snapshot ordered.
#[derive(Debug)]
struct Journal {
    base: Vec<Option<ResourceState>>,
    appended: Vec<ResourceState>,
    manifest: Manifest,
}

impl Journal {
    fn new(base: &Snapshot, manifest: Manifest) -> Self {
        Self {
            base: base.resources.iter().cloned().map(Some).collect(),
            appended: Vec::new(),
            manifest,
        }
    }

    fn entry(&mut self, index: usize) -> Option<&mut ResourceState> {
        self.base.get_mut(index).and_then(Option::as_mut)
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::None => {}
            Mutation::Append { new, consume } => {
                if let Some(index) = consume {
                    self.base[index] = None;
                }
                self.appended.push(new);
            }
            Mutation::AppendAndMark { new, mark } => {
                if let Some(old) = self.entry(mark) {
                    old.pending_delete = true;
                }
                self.appended.push(new);
            }
            Mutation::Remove(index) => self.base[index] = None,
            Mutation::MarkPendingReplacement(index) => {
                if let Some(old) = self.entry(index) {
                    old.pending_replacement = true;
                    old.id = None;
                    old.outputs.clear();
                }
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        let resources = self
            .appended
            .iter()
            .chain(self.base.iter().flatten())
            .cloned()
            .collect();
        Snapshot::new(self.manifest.clone(), resources)
    }
}

/// A failed provider operation, with the state it left behind.
struct Failure {
    message: String,
    partial: Option<ResourceState>,
}

impl Failure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            partial: None,
        }
    }
}

/// Shared by every worker task of one run.
struct Worker {
    stack: StackRef,
    providers: Arc<ProviderRegistry>,
    store: Arc<SnapshotStore>,
    journal: Mutex<Journal>,
}

impl Worker {
    /// Runs one step. An error means the checkpoint could not be written.
    async fn run(&self, step: &Step) -> Result<StepStatus> {
        let (mutation, outcome, changes_state) = self.perform(step).await;
        let status = match outcome {
            Ok(()) => {
                info!("{} {}", step.kind(), step.urn);
                StepStatus::Succeeded
            }
            Err(message) => {
                warn!("{} {} failed: {message}", step.kind(), step.urn);
                StepStatus::Failed { message }
            }
        };

        let mut journal = self.journal.lock().await;
        journal.apply(mutation);
        if changes_state {
            self.store.checkpoint(&self.stack, &journal.snapshot()).await?;
        }
        Ok(status)
    }

    async fn perform(&self, step: &Step) -> (Mutation, std::result::Result<(), String>, bool) {
        let index = step.old_index;
        let (mutation, outcome) = match &step.op {
            StepOp::Same { old, new } => {
                let mutation = Mutation::Append {
                    new: new.clone(),
                    consume: index,
                };
                return (mutation, Ok(()), old != new);
            }
            StepOp::Create { new } => settle(self.create(new).await, |new| Mutation::Append {
                new,
                consume: index,
            }),
            StepOp::Update {
                old,
                new,
                provider_call,
                ..
            } => settle(self.update(old, new, *provider_call).await, |new| {
                Mutation::Append {
                    new,
                    consume: index,
                }
            }),
            StepOp::Delete { old } => match self.delete(old).await {
                Ok(()) => (index.map_or(Mutation::None, Mutation::Remove), Ok(())),
                Err(failure) => (Mutation::None, Err(failure.message)),
            },
            StepOp::CreateReplacement { new, order, .. } => {
                settle(self.create(new).await, |new| match (order, index) {
                    (ReplaceOrder::CreateBeforeDelete, Some(mark)) => {
                        Mutation::AppendAndMark { new, mark }
                    }
                    _ => Mutation::Append {
                        new,
                        consume: index,
                    },
                })
            }
            StepOp::DeleteReplaced { old, order } => match self.delete(old).await {
                Ok(()) => {
                    let mutation = match (order, index) {
                        (_, None) => Mutation::None,
                        (ReplaceOrder::CreateBeforeDelete, Some(i)) => Mutation::Remove(i),
                        (ReplaceOrder::DeleteBeforeCreate, Some(i)) => {
                            Mutation::MarkPendingReplacement(i)
                        }
                    };
                    (mutation, Ok(()))
                }
                Err(failure) => (Mutation::None, Err(failure.message)),
            },
        };
        (mutation, outcome, true)
    }

    fn provider(&self, type_token: &str) -> std::result::Result<Arc<dyn Provider>, Failure> {
        self.providers
            .require(type_token)
            .map_err(|e| Failure::new(e.to_string()))
    }

    async fn create(&self, new: &ResourceState) -> std::result::Result<ResourceState, Failure> {
        let mut created = new.clone();
        if !new.custom {
            return Ok(created);
        }

        let provider = self.provider(&new.type_token)?;
        match provider.create(&new.type_token, &new.inputs).await {
            Ok(response) => {
                created.id = Some(response.id);
                created.outputs = response.outputs;
                Ok(created)
            }
            Err(err) => Err(Failure {
                partial: err.partial.map(|partial| {
                    created.id = partial.id;
                    created.outputs = partial.outputs;
                    created
                }),
                message: err.message,
            }),
        }
    }

    async fn update(
        &self,
        old: &ResourceState,
        new: &ResourceState,
        provider_call: bool,
    ) -> std::result::Result<ResourceState, Failure> {
        let mut updated = new.clone();
        if !provider_call || !new.custom {
            return Ok(updated);
        }

        let provider = self.provider(&new.type_token)?;
        let id = old.id.as_deref().unwrap_or_default();
        match provider
            .update(&new.type_token, id, &old.inputs, &new.inputs)
            .await
        {
            Ok(outputs) => {
                updated.outputs = outputs;
                Ok(updated)
            }
            Err(err) => Err(Failure {
                partial: err.partial.map(|partial| {
                    updated.id = partial.id.or_else(|| old.id.clone());
                    updated.outputs = partial.outputs;
                    updated
                }),
                message: err.message,
            }),
        }
    }

    async fn delete(&self, old: &ResourceState) -> std::result::Result<(), Failure> {
        if !old.custom || old.pending_replacement {
            return Ok(());
        }
        if old.retain_on_delete {
            info!("Retaining {}; dropping it from state only", old.urn);
            return Ok(());
        }

        let provider = self.provider(&old.type_token)?;
        let id = old.id.as_deref().unwrap_or_default();
        provider
            .delete(&old.type_token, id, &old.outputs)
            .await
            .map_err(|e| Failure::new(e.message))
    }
}

/// Maps a provider outcome to its journal effect; partial state is recorded.
fn settle(
    outcome: std::result::Result<ResourceState, Failure>,
    place: impl FnOnce(ResourceState) -> Mutation,
) -> (Mutation, std::result::Result<(), String>) {
    match outcome {
        Ok(state) => (place(state), Ok(())),
        Err(failure) => (
            failure.partial.map_or(Mutation::None, place),
            Err(failure.message),
        ),
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Executes plans against one stack.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    ctx: DeploymentContext,
    store: Arc<SnapshotStore>,
}

impl StepExecutor {
    /// Creates an executor writing checkpoints to `store`.
    #[must_use]
    pub const fn new(ctx: DeploymentContext, store: Arc<SnapshotStore>) -> Self {
        Self { ctx, store }
    }

    /// Executes `plan` starting from the recorded snapshot `base`.
    ///
    /// Checkpoints carry `manifest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the step graph has a cycle or a checkpoint cannot
    /// be written. Provider failures are reported in the
    /// [`ExecutionReport`], not as errors.
    pub async fn execute(&self, plan: &Plan, base: &Snapshot, manifest: Manifest) -> Result<ExecutionReport> {
        let graph = schedule_graph(plan)?;
        let parallelism = self.ctx.options.parallelism.max(1);
        info!(
            "Executing {} steps for {} (parallelism {parallelism})",
            plan.len(),
            self.ctx.stack
        );

        let worker = Arc::new(Worker {
            stack: self.ctx.stack.clone(),
            providers: Arc::clone(&self.ctx.providers),
            store: Arc::clone(&self.store),
            journal: Mutex::new(Journal::new(base, manifest)),
        });

        let mut in_degree = graph.in_degrees();
        let mut ready: BinaryHeap<Reverse<StepId>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| Reverse(id))
            .collect();
        let mut statuses: Vec<Option<StepStatus>> = vec![None; plan.len()];
        let mut tasks: JoinSet<(StepId, Result<StepStatus>)> = JoinSet::new();

        let mut cancel = self.ctx.cancelled();
        let mut cancel_open = true;
        let deadline = self.ctx.options.timeout.map(|t| Instant::now() + t);
        let mut cancelled = *cancel.borrow();
        let mut stopping = cancelled;
        let mut fatal: Option<ConvergeError> = None;

        loop {
            while !stopping && tasks.len() < parallelism {
                let Some(Reverse(id)) = ready.pop() else {
                    break;
                };
                let step = plan.steps[id].clone();
                debug!("Starting step {step}");
                let worker = Arc::clone(&worker);
                tasks.spawn(async move {
                    let result = worker.run(&step).await;
                    (step.id, result)
                });
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((id, Ok(status)))) => {
                        if status == StepStatus::Succeeded {
                            for next in graph.successors(id) {
                                in_degree[next] -= 1;
                                if in_degree[next] == 0 {
                                    ready.push(Reverse(next));
                                }
                            }
                        }
                        statuses[id] = Some(status);
                    }
                    Some(Ok((id, Err(err)))) => {
                        error!("Checkpoint after step {id} failed: {err}; halting");
                        stopping = true;
                        fatal.get_or_insert(err);
                    }
                    Some(Err(join_error)) => {
                        error!("Step task aborted: {join_error}; halting");
                        stopping = true;
                        fatal.get_or_insert_with(|| ConvergeError::internal(format!("step task aborted: {join_error}")));
                    }
                    None => {}
                },
                changed = cancel.changed(), if cancel_open && !stopping => {
                    if changed.is_err() {
                        cancel_open = false;
                    } else if *cancel.borrow() {
                        warn!("Cancelled; waiting for {} in-flight steps", tasks.len());
                        stopping = true;
                        cancelled = true;
                    }
                }
                () = deadline_reached(deadline), if deadline.is_some() && !stopping => {
                    warn!("Timed out; waiting for {} in-flight steps", tasks.len());
                    stopping = true;
                    cancelled = true;
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        let snapshot = worker.journal.lock().await.snapshot();
        let records: Vec<StepRecord> = plan
            .steps
            .iter()
            .map(|step| StepRecord {
                id: step.id,
                urn: step.urn.clone(),
                kind: step.kind(),
                status: statuses[step.id].take().unwrap_or(StepStatus::Skipped),
            })
            .collect();

        let report = ExecutionReport {
            records,
            cancelled,
            snapshot,
        };
        info!(
            "Execution finished: {} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }
}
