//! Dispatches a single [`Definition`] node by kind: leaf nodes resolve their
//! parameters and call out to the registry; group/loop/parallel containers
//! recurse. Shared by the top-level `Orchestrator::serve` entrypoint and by
//! the loop engine for per-iteration body execution.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};

use crate::cancel::CancellationToken;
use crate::context::ExecutionContext;
use crate::definition::{Definition, NodeKind};
use crate::error::{CancellationError, EngineError, NodeError};
use crate::graph::Graph;
use crate::loop_engine;
use crate::messenger::Messenger;
use crate::progress::{NodeState, ProgressModel};
use crate::registry::{NodeRegistry, OutputSink};
use crate::template::TemplateResolver;

/// Bridges a leaf's `_onOutput` sink calls to the configured [`Messenger`],
/// prefixing each line with the node's breadcrumb and an uppercased
/// tool-kind bracket (e.g. `[SHELL-COMMAND] outer:inner: building...`).
struct MessengerOutputSink {
    messenger: Arc<dyn Messenger>,
    node_id: String,
    kind: String,
    breadcrumb: String,
}

impl OutputSink for MessengerOutputSink {
    fn emit(&self, line: &str) {
        let prefix = self.kind.to_uppercase();
        let formatted = if self.breadcrumb.is_empty() {
            format!("[{prefix}] {line}")
        } else {
            format!("[{prefix}] {}: {line}", self.breadcrumb)
        };
        self.messenger.node_output(&self.node_id, &formatted);
    }
}

/// Holds the collaborators a running bento needs to dispatch nodes:
/// registry lookup, event sink, progress tracking, a shared execution
/// counter, and the run-wide output store. Cheap to clone — every field is
/// an `Arc` or a plain `usize`.
#[derive(Clone)]
pub struct NodeExecutor {
    registry: Arc<dyn NodeRegistry>,
    messenger: Arc<dyn Messenger>,
    progress: Arc<ProgressModel>,
    nodes_executed: Arc<AtomicUsize>,
    node_outputs: Arc<Mutex<Map<String, Value>>>,
    max_concurrency: usize,
    slow_mo: Option<Duration>,
    iteration_budget: Option<usize>,
}

impl NodeExecutor {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        messenger: Arc<dyn Messenger>,
        progress: Arc<ProgressModel>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            registry,
            messenger,
            progress,
            nodes_executed: Arc::new(AtomicUsize::new(0)),
            node_outputs: Arc::new(Mutex::new(Map::new())),
            max_concurrency,
            slow_mo: None,
            iteration_budget: None,
        }
    }

    /// Artificial per-leaf delay, useful when a host UI wants every step to
    /// be visibly observable instead of flashing past in microseconds.
    pub fn with_slow_mo(mut self, slow_mo: Option<Duration>) -> Self {
        self.slow_mo = slow_mo;
        self
    }

    /// Upper bound on a single loop's resolved iteration count. `None` means
    /// unbounded.
    pub fn with_iteration_budget(mut self, iteration_budget: Option<usize>) -> Self {
        self.iteration_budget = iteration_budget;
        self
    }

    pub fn iteration_budget(&self) -> Option<usize> {
        self.iteration_budget
    }

    pub fn nodes_executed(&self) -> usize {
        self.nodes_executed.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> &Arc<ProgressModel> {
        &self.progress
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    /// Snapshot of every node id that has completed successfully so far,
    /// including partial results from a parallel block whose aggregate
    /// later failed.
    pub async fn node_outputs(&self) -> Map<String, Value> {
        self.node_outputs.lock().await.clone()
    }

    /// Dispatch `node` by kind. Checked for cancellation first — every
    /// recursive call re-checks, so a cancellation mid-run is observed at
    /// the next node boundary rather than only at the top. On success the
    /// output is recorded into the run-wide output store before returning,
    /// so a sibling's success survives even if this node's container later
    /// reports an aggregate error.
    pub async fn execute_node(
        &self,
        node: &Definition,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<Value, EngineError> {
        self.dispatch_node(node, ctx, token, true).await
    }

    async fn dispatch_node(
        &self,
        node: &Definition,
        ctx: &ExecutionContext,
        token: &CancellationToken,
        count: bool,
    ) -> Result<Value, EngineError> {
        if token.is_cancelled() {
            return Err(EngineError::Cancelled(CancellationError));
        }

        let result = match node.node_kind() {
            NodeKind::Group => self
                .execute_group(node, ctx, token, count)
                .await
                .map(|child_ctx| Value::Object(child_ctx.to_map())),
            NodeKind::Parallel => self
                .execute_parallel(node, ctx, token, count)
                .await
                .map(|child_ctx| Value::Object(child_ctx.to_map())),
            NodeKind::Loop => loop_engine::run(self, node, ctx, token).await,
            NodeKind::Leaf(kind) => self.execute_leaf(node, kind, ctx, token).await,
        };

        if let Ok(output) = &result {
            self.node_outputs.lock().await.insert(node.id.clone(), output.clone());
            // `nodesExecuted` counts successful leaves and completed loop
            // containers; groups/parallels are transparent and never counted.
            // A node dispatched from inside a loop's body never counts,
            // regardless of its own kind.
            if count && matches!(node.node_kind(), NodeKind::Leaf(_) | NodeKind::Loop) {
                self.nodes_executed.fetch_add(1, Ordering::SeqCst);
            }
        }

        result
    }

    async fn execute_group(
        &self,
        container: &Definition,
        ctx: &ExecutionContext,
        token: &CancellationToken,
        count: bool,
    ) -> Result<ExecutionContext, EngineError> {
        self.messenger.node_started(&container.id, &container.name, "group");
        let started = Instant::now();

        let child_ctx = ctx.with_node(&container.name);
        let result = self.run_topological(container, child_ctx, token, count).await;

        let duration = started.elapsed();
        match &result {
            Ok(_) => self.messenger.node_completed(&container.id, duration, None),
            Err(err) => self.messenger.node_completed(&container.id, duration, Some(&err.to_string())),
        }

        result
    }

    /// Topological walk of `container.nodes`/`container.edges`, executing
    /// each ready node and folding its output into `ctx` under its name.
    /// Shared between group execution and a loop's per-iteration body; `count`
    /// controls whether descendants are counted into `nodes_executed` (always
    /// `false` when called from the loop engine's internal executor).
    pub(crate) async fn run_topological(
        &self,
        container: &Definition,
        mut ctx: ExecutionContext,
        token: &CancellationToken,
        count: bool,
    ) -> Result<ExecutionContext, EngineError> {
        let mut graph = Graph::build(container)
            .map_err(|err| EngineError::Node(NodeError::new(container.id.clone(), "group", "build graph", err)))?;
        graph
            .has_cycle()
            .map_err(|err| EngineError::Node(NodeError::new(container.id.clone(), "group", "validate", err)))?;

        let by_id: HashMap<&str, &Definition> =
            container.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut queue: VecDeque<String> = graph.start_nodes().into();

        while let Some(id) = queue.pop_front() {
            if graph.is_executed(&id) {
                continue;
            }
            let node = *by_id.get(id.as_str()).expect("graph built from container.nodes");
            let output = self.dispatch_node(node, &ctx, token, count).await?;
            ctx.set(node.name.clone(), output);
            graph.mark_executed(&id);
            for target in graph.targets(&id) {
                if graph.is_ready(target) && !graph.is_executed(target) {
                    queue.push_back(target.clone());
                }
            }
        }

        Ok(ctx)
    }

    /// Children run concurrently, bounded by `max_concurrency`. Every child
    /// runs regardless of sibling failures; the first error encountered
    /// (in join order, not start order) is returned once all have finished.
    async fn execute_parallel(
        &self,
        container: &Definition,
        ctx: &ExecutionContext,
        token: &CancellationToken,
        count: bool,
    ) -> Result<ExecutionContext, EngineError> {
        self.messenger.node_started(&container.id, &container.name, "parallel");
        let started = Instant::now();

        let result = self.run_parallel_children(container, ctx, token, count).await;

        let duration = started.elapsed();
        match &result {
            Ok(_) => self.messenger.node_completed(&container.id, duration, None),
            Err(err) => self.messenger.node_completed(&container.id, duration, Some(&err.to_string())),
        }

        result
    }

    /// Per-node `maxConcurrency` parameter: non-positive means unbounded,
    /// absent falls back to the engine-wide default.
    fn resolve_max_concurrency(&self, container: &Definition) -> usize {
        match container.parameters.get("maxConcurrency").and_then(Value::as_i64) {
            Some(n) if n > 0 => n as usize,
            Some(_) => usize::MAX,
            None => self.max_concurrency.max(1),
        }
    }

    async fn run_parallel_children(
        &self,
        container: &Definition,
        ctx: &ExecutionContext,
        token: &CancellationToken,
        count: bool,
    ) -> Result<ExecutionContext, EngineError> {
        let child_ctx = ctx.with_node(&container.name);
        let semaphore = Arc::new(Semaphore::new(self.resolve_max_concurrency(container)));
        let mut handles = Vec::with_capacity(container.nodes.len());

        for child in &container.nodes {
            let executor = self.clone();
            let node = child.clone();
            let node_ctx = child_ctx.clone();
            let node_token = token.clone();
            let permits = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.expect("semaphore is never closed");
                let name = node.name.clone();
                executor
                    .dispatch_node(&node, &node_ctx, &node_token, count)
                    .await
                    .map(|output| (name, output))
            }));
        }

        let mut merged = child_ctx;
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok((name, output))) => merged.set(name, output),
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(EngineError::Node(NodeError::new(
                        container.id.clone(),
                        "parallel",
                        "join",
                        join_err,
                    )));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(merged),
        }
    }

    async fn execute_leaf(
        &self,
        node: &Definition,
        kind: &str,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<Value, EngineError> {
        self.messenger.node_started(&node.id, &node.name, kind);
        self.progress.set_node_state(&node.id, NodeState::Running);
        let started = Instant::now();

        let result = self.run_leaf(node, kind, ctx, token).await;

        if let Some(slow_mo) = self.slow_mo {
            tokio::time::sleep(slow_mo).await;
        }

        let duration = started.elapsed();
        match &result {
            Ok(_) => {
                self.messenger.node_completed(&node.id, duration, None);
                self.progress.set_node_state(&node.id, NodeState::Completed);
            }
            Err(err) => {
                self.messenger.node_completed(&node.id, duration, Some(&err.to_string()));
                self.progress.set_node_state(&node.id, NodeState::Failed);
            }
        }

        result
    }

    async fn run_leaf(
        &self,
        node: &Definition,
        kind: &str,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<Value, EngineError> {
        let leaf = self
            .registry
            .get_new(kind)
            .map_err(|err| EngineError::Node(NodeError::new(node.id.clone(), kind, "get neta", err)))?;
        let mut params = TemplateResolver::resolve_params(&node.parameters, ctx);
        params.insert("_context".to_string(), Value::Object(ctx.to_map()));

        let sink: Arc<dyn OutputSink> = Arc::new(MessengerOutputSink {
            messenger: self.messenger.clone(),
            node_id: node.id.clone(),
            kind: kind.to_string(),
            breadcrumb: ctx.breadcrumb(),
        });

        let worker_token = token.clone();
        let node_id = node.id.clone();
        let node_kind = kind.to_string();

        match tokio::task::spawn_blocking(move || leaf.execute(worker_token, params, sink)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(registry_err)) => Err(EngineError::Node(NodeError::new(
                node_id,
                node_kind,
                "execute",
                registry_err,
            ))),
            Err(join_err) => Err(EngineError::Node(NodeError::new(
                node_id,
                node_kind,
                "execute",
                join_err,
            ))),
        }
    }
}
