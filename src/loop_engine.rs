//! `loop` node execution: `forEach` over a resolved list, `times` over a
//! resolved count, or `while` (not yet supported). Iterations may run
//! concurrently, bounded by a configurable semaphore; results are written
//! back in iteration-index order regardless of completion order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::context::ExecutionContext;
use crate::definition::Definition;
use crate::error::{EngineError, NodeError};
use crate::node::NodeExecutor;
use crate::progress::NodeState;
use crate::template::TemplateResolver;

pub async fn run(
    executor: &NodeExecutor,
    node: &Definition,
    ctx: &ExecutionContext,
    token: &CancellationToken,
) -> Result<Value, EngineError> {
    executor.messenger().node_started(&node.id, &node.name, "loop");
    executor.progress().set_node_state(&node.id, NodeState::Running);
    let started = Instant::now();

    let result = run_dispatch(executor, node, ctx, token).await;

    let duration = started.elapsed();
    match &result {
        Ok(_) => {
            executor.messenger().node_completed(&node.id, duration, None);
            executor.progress().set_node_state(&node.id, NodeState::Completed);
        }
        Err(err) => {
            executor.messenger().node_completed(&node.id, duration, Some(&err.to_string()));
            executor.progress().set_node_state(&node.id, NodeState::Failed);
        }
    }

    result
}

async fn run_dispatch(
    executor: &NodeExecutor,
    node: &Definition,
    ctx: &ExecutionContext,
    token: &CancellationToken,
) -> Result<Value, EngineError> {
    let params = TemplateResolver::resolve_params(&node.parameters, ctx);
    let mode = params.get("mode").and_then(Value::as_str).unwrap_or("forEach");

    match mode {
        "forEach" => run_for_each(executor, node, &params, ctx, token).await,
        "times" => run_times(executor, node, &params, ctx, token).await,
        "while" => Err(EngineError::Node(NodeError::new(
            node.id.clone(),
            "loop",
            "execute",
            "while loops are not yet supported",
        ))),
        other => Err(EngineError::Node(NodeError::new(
            node.id.clone(),
            "loop",
            "execute",
            format!("unknown loop mode '{other}'"),
        ))),
    }
}

async fn run_for_each(
    executor: &NodeExecutor,
    node: &Definition,
    params: &Map<String, Value>,
    ctx: &ExecutionContext,
    token: &CancellationToken,
) -> Result<Value, EngineError> {
    let items = match params.get("items").cloned() {
        Some(Value::Array(list)) => list,
        Some(other) => {
            return Err(EngineError::Node(NodeError::new(
                node.id.clone(),
                "loop",
                "validate",
                format!("'items' must be an array, got {}", value_type_name(&other)),
            )));
        }
        None => {
            return Err(EngineError::Node(NodeError::new(
                node.id.clone(),
                "loop",
                "validate",
                "'items' must be an array, got none",
            )));
        }
    };
    let continue_on_error = params.get("continueOnError").and_then(Value::as_bool).unwrap_or(false);
    let concurrency = params.get("maxConcurrency").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;
    let item_var = params.get("itemVar").and_then(Value::as_str).unwrap_or("item").to_string();
    let index_var = params.get("indexVar").and_then(Value::as_str).unwrap_or("index").to_string();

    run_iterations(executor, node, items, concurrency, continue_on_error, item_var, index_var, ctx, token).await
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `times` is fail-fast only (no `continueOnError`) and sets `iteration`/
/// `index` on each forked context, not `item`.
async fn run_times(
    executor: &NodeExecutor,
    node: &Definition,
    params: &Map<String, Value>,
    ctx: &ExecutionContext,
    token: &CancellationToken,
) -> Result<Value, EngineError> {
    let count = params.get("count").and_then(Value::as_u64).unwrap_or(0);
    let items: Vec<Value> = (0..count).map(Value::from).collect();
    let concurrency = params.get("maxConcurrency").and_then(Value::as_u64).unwrap_or(1).max(1) as usize;

    run_iterations(
        executor,
        node,
        items,
        concurrency,
        false,
        "iteration".to_string(),
        "index".to_string(),
        ctx,
        token,
    )
    .await
}

/// Body is the loop node's own `nodes`/`edges` (same shape as a group's
/// child graph), run once per item with `item_var`/`index_var` injected
/// into a forked context.
async fn run_iterations(
    executor: &NodeExecutor,
    node: &Definition,
    items: Vec<Value>,
    concurrency: usize,
    continue_on_error: bool,
    item_var: String,
    index_var: String,
    ctx: &ExecutionContext,
    token: &CancellationToken,
) -> Result<Value, EngineError> {
    let total = items.len();
    if let Some(budget) = executor.iteration_budget()
        && total > budget
    {
        return Err(EngineError::Node(NodeError::new(
            node.id.clone(),
            "loop",
            "execute",
            format!("resolved {total} iterations exceeds iteration budget of {budget}"),
        )));
    }
    executor.progress().set_node_progress(&node.id, 0);
    if total == 0 {
        return Ok(Value::Array(vec![]));
    }

    let completed = Arc::new(AtomicUsize::new(0));
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut handles = Vec::with_capacity(total);

    for (index, item) in items.into_iter().enumerate() {
        let executor = executor.clone();
        let body = node.clone();
        let mut iter_ctx = ctx.with_node(&format!("{}[{}]", node.name, index));
        let iter_token = token.clone();
        let permits = semaphore.clone();
        let completed = completed.clone();
        let item_var = item_var.clone();
        let index_var = index_var.clone();
        let loop_id = node.id.clone();
        let child_name = format!("{}[{}]", node.name, index);

        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.expect("semaphore is never closed");
            executor.messenger().loop_child(&loop_id, &child_name, index, total);

            iter_ctx.set(item_var, item);
            iter_ctx.set(index_var, Value::from(index as u64));

            // `count: false` — loop body children never touch `nodes_executed`;
            // only the loop container itself is counted, once, by its caller.
            let result = executor.run_topological(&body, iter_ctx, &iter_token, false).await;

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            let percent = ((done as f64 / total as f64) * 100.0).floor() as u8;
            executor.progress().set_node_progress(&loop_id, percent);

            result.map(|c| Value::Object(c.to_map()))
        }));
    }

    let mut slots: Vec<Value> = vec![Value::Null; total];
    let mut first_error = None;

    for (index, outcome) in futures::future::join_all(handles).await.into_iter().enumerate() {
        match outcome {
            Ok(Ok(output)) => slots[index] = output,
            Ok(Err(err)) => {
                if !continue_on_error {
                    first_error.get_or_insert(err);
                }
            }
            Err(join_err) => {
                if !continue_on_error {
                    first_error.get_or_insert(EngineError::Node(NodeError::new(
                        node.id.clone(),
                        "loop",
                        "join",
                        join_err,
                    )));
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(Value::Array(slots))
}
