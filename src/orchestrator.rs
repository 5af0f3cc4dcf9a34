//! Top-level entry point. `Orchestrator::serve` is the only public async
//! call a host needs: it wires up a fresh progress model and node executor
//! for one bento run, drives it to completion, and packages the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::context::ExecutionContext;
use crate::definition::Definition;
use crate::error::EngineError;
use crate::messenger::Messenger;
use crate::node::NodeExecutor;
use crate::progress::ProgressModel;
use crate::registry::NodeRegistry;
use crate::secrets::SecretsProvider;

/// Wraps a caller-supplied [`Messenger`] so that every `NodeStarted`/
/// `NodeCompleted` transition — leaf and container alike — also fans out to
/// the `(id, status)` callbacks registered via [`Orchestrator::on_progress`].
struct CallbackMessenger {
    inner: Arc<dyn Messenger>,
    callbacks: Vec<Arc<dyn Fn(&str, &str) + Send + Sync>>,
}

impl Messenger for CallbackMessenger {
    fn node_started(&self, id: &str, name: &str, kind: &str) {
        self.inner.node_started(id, name, kind);
        for callback in &self.callbacks {
            callback(id, "starting");
        }
    }

    fn node_completed(&self, id: &str, duration: Duration, error: Option<&str>) {
        self.inner.node_completed(id, duration, error);
        let status = if error.is_some() { "error" } else { "completed" };
        for callback in &self.callbacks {
            callback(id, status);
        }
    }

    fn loop_child(&self, loop_id: &str, child_name: &str, index: usize, total: usize) {
        self.inner.loop_child(loop_id, child_name, index, total);
    }

    fn node_output(&self, id: &str, line: &str) {
        self.inner.node_output(id, line);
    }
}

/// Knobs a config loader would set before handing a run to the engine.
/// Plain data, `Default`-able — no file parsing happens in this crate.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Artificial delay inserted after every leaf execution, useful for a
    /// host UI that wants each step to be visibly observable.
    pub slow_mo: Option<Duration>,
    /// Bound used for parallel/forEach nodes that don't set their own
    /// `maxConcurrency`.
    pub max_concurrency_default: usize,
    /// Upper bound on loop iterations, guarding against a pathological
    /// `times`/`forEach` body accidentally producing an unbounded run.
    pub iteration_budget: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            slow_mo: None,
            max_concurrency_default: 4,
            iteration_budget: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

/// Named `RunResult` rather than `Result` to avoid clashing with
/// `std::result::Result` at call sites that `use bento_engine::*`.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Correlates this run's log lines and progress callbacks; fresh per
    /// `serve()` call.
    pub run_id: Uuid,
    pub status: RunStatus,
    pub nodes_executed: usize,
    /// Every node id that completed successfully, including partial output
    /// from a parallel block whose aggregate later failed.
    pub node_outputs: Map<String, Value>,
    pub duration: Duration,
    pub error: Option<String>,
    /// One-line completion summaries, so a caller without a `tracing`
    /// subscriber installed can still retrieve what ran.
    pub logs: Vec<String>,
}

/// Builds up `on_progress` callbacks, then runs one bento to completion.
pub struct Orchestrator {
    options: EngineOptions,
    on_progress: Vec<Arc<dyn Fn(&str, &str) + Send + Sync>>,
}

impl Orchestrator {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            on_progress: Vec::new(),
        }
    }

    /// Register a callback invoked as `(node_id, status)` at every node's
    /// `starting`/`completed`/`error` transition, leaf and container alike.
    pub fn on_progress(mut self, callback: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_progress.push(Arc::new(callback));
        self
    }

    /// The only public async entry point. Consumes `root` by reference so a
    /// host may hold on to the same `Definition` across repeated runs.
    pub async fn serve(
        &self,
        root: &Definition,
        registry: Arc<dyn NodeRegistry>,
        secrets: Option<Arc<dyn SecretsProvider>>,
        messenger: Arc<dyn Messenger>,
        token: CancellationToken,
    ) -> RunResult {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let progress = Arc::new(ProgressModel::build(root));

        let messenger: Arc<dyn Messenger> = if self.on_progress.is_empty() {
            messenger
        } else {
            Arc::new(CallbackMessenger {
                inner: messenger,
                callbacks: self.on_progress.clone(),
            })
        };

        let executor = NodeExecutor::new(registry, messenger, progress.clone(), self.options.max_concurrency_default.max(1))
            .with_slow_mo(self.options.slow_mo)
            .with_iteration_budget(self.options.iteration_budget);
        let ctx = ExecutionContext::new_root(secrets);

        tracing::info!(%run_id, node_id = %root.id, name = %root.name, "running bento");

        let outcome = executor.execute_node(root, &ctx, &token).await;

        let percent = progress.overall_percent();
        let node_outputs = executor.node_outputs().await;
        let nodes_executed = executor.nodes_executed();
        let duration = started.elapsed();

        let (status, error) = match &outcome {
            Ok(_) => (RunStatus::Success, None),
            Err(EngineError::Cancelled(_)) => (RunStatus::Cancelled, Some("context canceled".to_string())),
            Err(err) => (RunStatus::Failed, Some(err.to_string())),
        };

        let summary = format!(
            "run {run_id} bento '{}' finished: status={status:?} nodes_executed={nodes_executed} percent={percent} duration={duration:?}",
            root.name
        );
        tracing::info!(%run_id, node_id = %root.id, status = ?status, percent, "run completed");

        RunResult {
            run_id,
            status,
            nodes_executed,
            node_outputs,
            duration,
            error,
            logs: vec![summary],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::NoopMessenger;
    use crate::registry::{LeafNode, OutputSink, RegistryError};
    use serde_json::{Map as JsonMap, json};
    use std::sync::Mutex;

    struct EchoLeaf;
    impl LeafNode for EchoLeaf {
        fn execute(
            &self,
            _token: CancellationToken,
            params: JsonMap<String, Value>,
            _output: Arc<dyn OutputSink>,
        ) -> Result<Value, RegistryError> {
            Ok(Value::Object(params))
        }
    }

    struct FixtureRegistry;
    impl NodeRegistry for FixtureRegistry {
        fn get_new(&self, kind: &str) -> Result<Box<dyn LeafNode>, RegistryError> {
            match kind {
                "echo" => Ok(Box::new(EchoLeaf)),
                other => Err(RegistryError::UnknownKind(other.to_string())),
            }
        }
        fn has(&self, kind: &str) -> bool {
            kind == "echo"
        }
        fn list(&self) -> Vec<String> {
            vec!["echo".into()]
        }
    }

    fn leaf(id: &str, kind: &str) -> Definition {
        Definition {
            id: id.to_string(),
            kind: kind.to_string(),
            name: id.to_string(),
            version: None,
            parameters: JsonMap::new(),
            nodes: vec![],
            edges: vec![],
            position: None,
            input_ports: None,
            output_ports: None,
        }
    }

    #[tokio::test]
    async fn serve_runs_a_single_leaf_to_success() {
        let mut node = leaf("n1", "echo");
        node.parameters.insert("value".into(), json!(1));

        let orchestrator = Orchestrator::new(EngineOptions::default());
        let result = orchestrator
            .serve(
                &node,
                Arc::new(FixtureRegistry),
                None,
                Arc::new(NoopMessenger),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.nodes_executed, 1);
        assert!(result.node_outputs.contains_key("n1"));
        assert!(result.error.is_none());
        assert_eq!(result.logs.len(), 1);
    }

    #[tokio::test]
    async fn serve_reports_unknown_kind_as_failed() {
        let node = leaf("n1", "mystery");
        let orchestrator = Orchestrator::new(EngineOptions::default());
        let result = orchestrator
            .serve(
                &node,
                Arc::new(FixtureRegistry),
                None,
                Arc::new(NoopMessenger),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn serve_reports_cancelled_when_token_is_pre_cancelled() {
        let node = leaf("n1", "echo");
        let orchestrator = Orchestrator::new(EngineOptions::default());
        let token = CancellationToken::new();
        token.cancel();

        let result = orchestrator
            .serve(&node, Arc::new(FixtureRegistry), None, Arc::new(NoopMessenger), token)
            .await;

        assert_eq!(result.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn on_progress_callback_fires_on_start_and_completion() {
        let node = leaf("n1", "echo");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let orchestrator = Orchestrator::new(EngineOptions::default()).on_progress(move |id, status| {
            seen_clone.lock().unwrap().push((id.to_string(), status.to_string()));
        });

        orchestrator
            .serve(&node, Arc::new(FixtureRegistry), None, Arc::new(NoopMessenger), CancellationToken::new())
            .await;

        let calls = seen.lock().unwrap();
        assert_eq!(
            *calls,
            vec![("n1".to_string(), "starting".to_string()), ("n1".to_string(), "completed".to_string())]
        );
    }

    #[tokio::test]
    async fn on_progress_callback_reports_error_status_on_failure() {
        let node = leaf("n1", "mystery");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let orchestrator = Orchestrator::new(EngineOptions::default()).on_progress(move |id, status| {
            seen_clone.lock().unwrap().push((id.to_string(), status.to_string()));
        });

        orchestrator
            .serve(&node, Arc::new(FixtureRegistry), None, Arc::new(NoopMessenger), CancellationToken::new())
            .await;

        let calls = seen.lock().unwrap();
        assert_eq!(
            *calls,
            vec![("n1".to_string(), "starting".to_string()), ("n1".to_string(), "error".to_string())]
        );
    }
}
