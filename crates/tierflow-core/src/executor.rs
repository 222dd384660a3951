//! Plan execution
//!
//! Every node runs on its own tokio task. A task waits for its dependencies
//! to become `Ready` (or, on teardown, for its dependents to be deleted),
//! takes a permit from the parallelism semaphore and calls the backend.
//! The first failure raises the abort signal: nodes already talking to the
//! backend finish, nodes that have not started stay `Declared` and are
//! reported as skipped.

use crate::binding::resolve_inputs;
use crate::error::{BindingError, ProvisionError};
use crate::graph::{DependencyGraph, NodeHandle, ResourceNode};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tierflow_cloud::{
    Action, ActionType, ApplyReport, CloudError, DeleteOutcome, FailedResource, Operation,
    Outputs, Plan, ProvisioningBackend, RecordedResource, ResourceKind, ResourceRecord,
    ResourceState, RetryConfig,
};
use tokio::sync::{Semaphore, SemaphorePermit, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Backend calls allowed in flight unless configured otherwise
pub const DEFAULT_PARALLELISM: usize = 4;

/// Per-node lifecycle within one execution
#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    Declared,
    Resolving,
    Provisioning,
    Ready(Outputs),
    Failed(String),
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Ready(_) | NodeStatus::Failed(_))
    }

    pub fn outputs(&self) -> Option<&Outputs> {
        match self {
            NodeStatus::Ready(outputs) => Some(outputs),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Declared => "declared",
            NodeStatus::Resolving => "resolving",
            NodeStatus::Provisioning => "provisioning",
            NodeStatus::Ready(_) => "ready",
            NodeStatus::Failed(_) => "failed",
        }
    }
}

/// Runs a [`DependencyGraph`] against a backend
pub struct Executor {
    graph: Arc<DependencyGraph>,
    backend: Arc<dyn ProvisioningBackend>,
    retry: RetryConfig,
    parallelism: usize,
}

impl Executor {
    pub fn new(graph: DependencyGraph, backend: Arc<dyn ProvisioningBackend>) -> Self {
        Self {
            graph: Arc::new(graph),
            backend,
            retry: RetryConfig::default(),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Limit concurrent backend calls (at least 1)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Fresh per-node state for one run
    pub fn start(&self) -> Arc<ExecutionState> {
        Arc::new(ExecutionState::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.backend),
            self.retry.clone(),
            self.parallelism,
        ))
    }

    /// Create or update every node, then delete recorded resources that
    /// are no longer declared
    ///
    /// Undeclared resources are only pruned once every node succeeded.
    pub async fn apply(&self) -> Result<ApplyReport, ProvisionError> {
        info!(
            backend = self.backend.name(),
            resources = self.graph.len(),
            parallelism = self.parallelism,
            "Applying plan"
        );
        let started = Instant::now();
        let orphans = self.orphans().await?;

        let mut report = ApplyReport::new(Operation::Apply);
        self.run(self.start(), &mut report).await;
        if report.is_success() {
            self.prune(&orphans, &mut report).await;
        } else {
            report
                .skipped
                .extend(orphans.iter().rev().map(|orphan| orphan.name.clone()));
        }
        Ok(self.finish(report, started))
    }

    /// Delete every recorded resource: undeclared ones first, then every
    /// node with dependents before their dependencies
    pub async fn destroy(&self) -> Result<ApplyReport, ProvisionError> {
        info!(
            backend = self.backend.name(),
            resources = self.graph.len(),
            parallelism = self.parallelism,
            "Destroying plan"
        );
        let started = Instant::now();
        let orphans = self.orphans().await?;

        let mut report = ApplyReport::new(Operation::Destroy);
        if self.prune(&orphans, &mut report).await {
            self.run(self.start(), &mut report).await;
        } else {
            report
                .skipped
                .extend(self.graph.reverse_plan().map(|node| node.name().to_string()));
        }
        Ok(self.finish(report, started))
    }

    /// Run every node as `report.operation`, recording results in plan order
    async fn run(&self, state: Arc<ExecutionState>, report: &mut ApplyReport) {
        let operation = report.operation;
        let mut tasks = JoinSet::new();

        for node in self.graph.plan() {
            let handle = node.handle();
            let state = Arc::clone(&state);
            tasks.spawn(async move {
                let result = match operation {
                    Operation::Apply => state.resolve(handle).await,
                    Operation::Destroy => state.teardown(handle).await,
                };
                (handle, result)
            });
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut skipped = BTreeSet::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((handle, Ok(record))) => succeeded.push((handle, record)),
                Ok((handle, Err(ProvisionError::Aborted { .. }))) => {
                    skipped.insert(handle);
                }
                Ok((handle, Err(e))) => {
                    let node = self.graph.node(handle);
                    error!(node = %node.name(), kind = %node.kind(), error = %e, "Resource failed");
                    failed.push((
                        handle,
                        FailedResource {
                            name: node.name().to_string(),
                            kind: node.kind(),
                            error: e.to_string(),
                            attempts: e.attempts(),
                        },
                    ));
                }
                Err(e) => {
                    // The node is identified from its status below
                    error!(error = %e, "Execution task terminated unexpectedly");
                    state.abort();
                }
            }
        }

        for node in self.graph.plan() {
            if matches!(
                state.status(node.handle()),
                NodeStatus::Resolving | NodeStatus::Provisioning
            ) {
                failed.push((
                    node.handle(),
                    FailedResource {
                        name: node.name().to_string(),
                        kind: node.kind(),
                        error: "execution task terminated unexpectedly".to_string(),
                        attempts: 0,
                    },
                ));
            }
        }

        let teardown = operation == Operation::Destroy;
        let in_plan_order = |a: &NodeHandle, b: &NodeHandle| {
            if teardown { b.cmp(a) } else { a.cmp(b) }
        };
        succeeded.sort_by(|(a, _), (b, _)| in_plan_order(a, b));
        failed.sort_by(|(a, _), (b, _)| in_plan_order(a, b));
        let mut skipped: Vec<_> = skipped.into_iter().collect();
        skipped.sort_by(in_plan_order);

        for (_, record) in succeeded {
            report.add_success(record);
        }
        for (_, failure) in failed {
            report.add_failure(failure);
        }
        report.skipped.extend(
            skipped
                .into_iter()
                .map(|handle| self.graph.node(handle).name().to_string()),
        );
    }

    /// Recorded resources that no node declares, oldest first
    async fn orphans(&self) -> Result<Vec<RecordedResource>, ProvisionError> {
        let recorded = self.backend.list_resources().await?;
        Ok(recorded
            .into_iter()
            .filter(|resource| {
                self.graph
                    .handle(&resource.name)
                    .is_none_or(|handle| self.graph.node(handle).kind() != resource.kind)
            })
            .collect())
    }

    /// Delete undeclared resources newest first, stopping at the first
    /// failure. Returns whether all of them are gone.
    async fn prune(&self, orphans: &[RecordedResource], report: &mut ApplyReport) -> bool {
        let mut remaining = orphans.iter().rev();
        while let Some(orphan) = remaining.next() {
            let backend = self.backend.as_ref();
            let (kind, name) = (orphan.kind, orphan.name.as_str());
            let result = call_with_retry(&self.retry, name, move || {
                delete_or_absent(backend, kind, name)
            })
            .await;

            match result {
                Ok(outcome) => {
                    info!(resource = %name, %kind, id = %orphan.id, "Pruned undeclared resource");
                    report.pruned.push(deletion_record(kind, name, outcome));
                }
                Err((source, attempts)) => {
                    let e = ProvisionError::Teardown {
                        node: name.to_string(),
                        kind,
                        attempts,
                        source,
                    };
                    error!(resource = %name, %kind, error = %e, "Pruning failed");
                    report.add_failure(FailedResource {
                        name: name.to_string(),
                        kind,
                        error: e.to_string(),
                        attempts,
                    });
                    report
                        .skipped
                        .extend(remaining.map(|orphan| orphan.name.clone()));
                    return false;
                }
            }
        }
        true
    }

    fn finish(&self, mut report: ApplyReport, started: Instant) -> ApplyReport {
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            succeeded = report.succeeded.len(),
            pruned = report.pruned.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            duration_ms = report.duration_ms,
            "Execution finished"
        );
        report
    }

    /// Compare every node with what the backend has recorded
    ///
    /// Inputs that read outputs of a dependency not yet recorded are unknown
    /// until apply; such nodes are reported as `create` or `update`.
    /// Recorded resources no node declares are reported as `delete`.
    pub async fn preview(&self) -> Result<Plan, ProvisionError> {
        let mut recorded: HashMap<NodeHandle, ResourceState> = HashMap::new();
        let mut actions = Vec::with_capacity(self.graph.len());

        for node in self.graph.plan() {
            let current = self.backend.describe(node.kind(), node.name()).await?;
            let resolved = resolve_inputs(node.inputs(), |dep, key| {
                let handle = self.graph.handle(dep)?;
                recorded.get(&handle)?.outputs.get(key).cloned()
            });

            let action = match (&current, resolved) {
                (_, Err(BindingError::Template(message))) => {
                    return Err(ProvisionError::Binding {
                        node: node.name().to_string(),
                        source: BindingError::Template(message),
                    });
                }
                (None, Ok(inputs)) => {
                    Action::new(ActionType::Create, node.kind(), node.name())
                        .with_detail("inputs", inputs.redacted)
                }
                (None, Err(BindingError::MissingOutput { .. })) => {
                    Action::new(ActionType::Create, node.kind(), node.name())
                        .with_detail("known_after_apply", json!(true))
                }
                (Some(state), Ok(inputs)) if state.inputs == inputs.value => {
                    Action::new(ActionType::NoOp, node.kind(), node.name())
                        .with_detail("id", json!(state.id))
                }
                (Some(state), Ok(inputs)) => {
                    Action::new(ActionType::Update, node.kind(), node.name())
                        .with_detail("id", json!(state.id))
                        .with_detail("changed", json!(changed_keys(&state.inputs, &inputs.value)))
                }
                (Some(state), Err(BindingError::MissingOutput { .. })) => {
                    Action::new(ActionType::Update, node.kind(), node.name())
                        .with_detail("id", json!(state.id))
                        .with_detail("known_after_apply", json!(true))
                }
            };

            debug!(node = %node.name(), action = %action.action_type, "Previewed resource");
            if let Some(state) = current {
                recorded.insert(node.handle(), state);
            }
            actions.push(action);
        }

        for orphan in self.orphans().await?.into_iter().rev() {
            debug!(resource = %orphan.name, kind = %orphan.kind, "Recorded resource is no longer declared");
            actions.push(
                Action::new(ActionType::Delete, orphan.kind, orphan.name)
                    .with_detail("id", json!(orphan.id)),
            );
        }

        Ok(Plan::new(actions))
    }
}

/// Top-level input keys whose values differ
fn changed_keys(recorded: &Value, desired: &Value) -> Vec<String> {
    match (recorded, desired) {
        (Value::Object(old), Value::Object(new)) => old
            .keys()
            .chain(new.keys())
            .filter(|key| old.get(*key) != new.get(*key))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        _ => Vec::new(),
    }
}

async fn delete_or_absent(
    backend: &dyn ProvisioningBackend,
    kind: ResourceKind,
    name: &str,
) -> tierflow_cloud::Result<DeleteOutcome> {
    match backend.delete(kind, name).await {
        Err(e) if e.is_not_found() => Ok(DeleteOutcome::Absent),
        other => other,
    }
}

fn deletion_record(kind: ResourceKind, name: &str, outcome: DeleteOutcome) -> ResourceRecord {
    let mut outputs = Outputs::new();
    outputs.insert("outcome".to_string(), json!(outcome));
    ResourceRecord {
        name: name.to_string(),
        kind,
        inputs: Value::Null,
        outputs,
    }
}

/// Call the backend, retrying transient errors with backoff
async fn call_with_retry<T, F, Fut>(
    retry: &RetryConfig,
    name: &str,
    mut call: F,
) -> Result<T, (CloudError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = tierflow_cloud::Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    node = %name,
                    attempt,
                    max_attempts = retry.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient backend error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// Shared state of one apply or destroy run
pub struct ExecutionState {
    graph: Arc<DependencyGraph>,
    backend: Arc<dyn ProvisioningBackend>,
    retry: RetryConfig,
    permits: Semaphore,
    cells: Vec<watch::Sender<NodeStatus>>,
    aborted: watch::Sender<bool>,
}

impl ExecutionState {
    pub fn new(
        graph: Arc<DependencyGraph>,
        backend: Arc<dyn ProvisioningBackend>,
        retry: RetryConfig,
        parallelism: usize,
    ) -> Self {
        let cells = (0..graph.len())
            .map(|_| watch::channel(NodeStatus::Declared).0)
            .collect();
        Self {
            graph,
            backend,
            retry,
            permits: Semaphore::new(parallelism.max(1)),
            cells,
            aborted: watch::channel(false).0,
        }
    }

    pub fn status(&self, handle: NodeHandle) -> NodeStatus {
        self.cells[handle.index()].borrow().clone()
    }

    pub fn is_aborted(&self) -> bool {
        *self.aborted.borrow()
    }

    /// Stop scheduling new nodes
    pub fn abort(&self) {
        self.aborted.send_replace(true);
    }

    fn set(&self, handle: NodeHandle, status: NodeStatus) {
        debug!(
            node = %self.graph.node(handle).name(),
            status = status.label(),
            "Node status changed"
        );
        self.cells[handle.index()].send_replace(status);
    }

    fn fail(&self, handle: NodeHandle, error: &ProvisionError) {
        self.set(handle, NodeStatus::Failed(error.to_string()));
        self.abort();
    }

    /// Provision one node once its dependencies are ready
    ///
    /// Never reads outputs of a dependency that is not `Ready`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve(&self, handle: NodeHandle) -> Result<ResourceRecord, ProvisionError> {
        let node = self.graph.node(handle);
        self.set(handle, NodeStatus::Resolving);

        let _permit = match self.admit(node, node.depends_on()).await {
            Ok(permit) => permit,
            Err(e) => {
                self.set(handle, NodeStatus::Declared);
                return Err(e);
            }
        };

        let resolved = resolve_inputs(node.inputs(), |dep, key| {
            let dep = self.graph.handle(dep)?;
            self.cells[dep.index()]
                .borrow()
                .outputs()
                .and_then(|outputs| outputs.get(key).cloned())
        });
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(source) => {
                let e = ProvisionError::Binding {
                    node: node.name().to_string(),
                    source,
                };
                self.fail(handle, &e);
                return Err(e);
            }
        };

        self.set(handle, NodeStatus::Provisioning);
        let backend = self.backend.as_ref();
        let (kind, name, inputs) = (node.kind(), node.name(), &resolved.value);
        let result = call_with_retry(&self.retry, name, move || {
            backend.create_or_update(kind, name, inputs)
        })
        .await;

        match result {
            Ok(resource) => {
                info!(node = %name, %kind, id = %resource.id, "Resource ready");
                self.set(handle, NodeStatus::Ready(resource.outputs.clone()));
                Ok(ResourceRecord {
                    name: name.to_string(),
                    kind,
                    inputs: resolved.redacted,
                    outputs: resource.outputs,
                })
            }
            Err((source, attempts)) => {
                let e = ProvisionError::Provisioning {
                    node: name.to_string(),
                    kind,
                    attempts,
                    source,
                };
                self.fail(handle, &e);
                Err(e)
            }
        }
    }

    /// Delete one node once every node depending on it is deleted
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn teardown(&self, handle: NodeHandle) -> Result<ResourceRecord, ProvisionError> {
        let node = self.graph.node(handle);
        self.set(handle, NodeStatus::Resolving);

        let _permit = match self.admit(node, self.graph.dependents(handle)).await {
            Ok(permit) => permit,
            Err(e) => {
                self.set(handle, NodeStatus::Declared);
                return Err(e);
            }
        };

        self.set(handle, NodeStatus::Provisioning);
        let backend = self.backend.as_ref();
        let (kind, name) = (node.kind(), node.name());
        let result =
            call_with_retry(&self.retry, name, move || delete_or_absent(backend, kind, name))
                .await;

        match result {
            Ok(outcome) => {
                match outcome {
                    DeleteOutcome::Deleted => info!(node = %name, %kind, "Resource deleted"),
                    DeleteOutcome::Absent => debug!(node = %name, %kind, "Resource already absent"),
                }
                let record = deletion_record(kind, name, outcome);
                self.set(handle, NodeStatus::Ready(record.outputs.clone()));
                Ok(record)
            }
            Err((source, attempts)) => {
                let e = ProvisionError::Teardown {
                    node: name.to_string(),
                    kind,
                    attempts,
                    source,
                };
                self.fail(handle, &e);
                Err(e)
            }
        }
    }

    /// Wait until every node in `after` is ready, then take a permit
    async fn admit(
        &self,
        node: &ResourceNode,
        after: &[NodeHandle],
    ) -> Result<SemaphorePermit<'_>, ProvisionError> {
        let aborted = || ProvisionError::Aborted {
            node: node.name().to_string(),
        };

        for other in after {
            if !self.wait_ready(*other).await {
                return Err(aborted());
            }
        }

        let permit = self.permits.acquire().await.map_err(|_| aborted())?;
        if self.is_aborted() {
            return Err(aborted());
        }
        Ok(permit)
    }

    /// `true` once `handle` is ready, `false` if it failed or the run aborted
    async fn wait_ready(&self, handle: NodeHandle) -> bool {
        let mut status = self.cells[handle.index()].subscribe();
        let mut aborted = self.aborted.subscribe();

        tokio::select! {
            biased;
            result = status.wait_for(NodeStatus::is_terminal) => {
                matches!(result.as_deref(), Ok(NodeStatus::Ready(_)))
            }
            _ = aborted.wait_for(|aborted| *aborted) => false,
        }
    }
}
