//! One node, from its first attempt to its final result.

use std::{
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::FutureExt;
use serde_json::Value;

use crate::{
    catalog::{Control, NodeInput, NodeOutput},
    dispatcher::region::Region,
    error::NodeError,
    policy::{PolicyEngine, Verdict},
    runtime::{Context, VariableScope},
    store::data::{NodeResult, NodeStatus},
    workflow::Node,
};

/// What a finished node means for its outgoing edges.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// Ran, or failed into a fallback value.
    Success { value: Value, port: Option<String> },
    /// Failed into a skip; downstream receives null.
    Skipped,
    /// Failed into its error handler; only the `error` edge into `handler` is taken.
    Branch { error: NodeError, handler: String },
    /// Stopped or cancelled; nothing downstream runs.
    Halted,
}

pub(crate) async fn run_node(
    ctx: Arc<Context>,
    node: Node,
    scope: VariableScope,
    inputs: Vec<NodeInput>,
    iteration: Option<usize>,
) -> Outcome {
    let mut attempt = 0u32;
    let started = Instant::now();

    loop {
        ctx.node_running(&node.id, attempt);
        let attempt_start = Instant::now();
        let result = attempt_once(&ctx, &node, &scope, &inputs, attempt).await;

        let err = match result {
            Ok(output) => return succeed(&ctx, &node, &scope, output, attempt, started, iteration).await,
            Err(err) => err,
        };

        let verdict = PolicyEngine::handle(&node.policy, &err, attempt);
        let mut result = NodeResult::new(&node.id, &node.name, NodeStatus::Failed);
        result.duration_ms = attempt_start.elapsed().as_millis() as u64;
        result.retry_count = attempt;
        result.iteration = iteration;
        result.error = Some(err.clone());

        match verdict {
            Verdict::Retry(delay) => {
                tracing::warn!(eid = %ctx.id(), nid = %node.id, kind = %err.kind, attempt, delay_ms = delay.as_millis() as u64, "node failed, retrying");
                result.status = NodeStatus::Retried;
                ctx.record(result);
                if !pause(&ctx, delay).await {
                    ctx.record_cancelled(&node, iteration);
                    return Outcome::Halted;
                }
                attempt += 1;
            }
            Verdict::UseFallback(value) => {
                tracing::warn!(eid = %ctx.id(), nid = %node.id, kind = %err.kind, attempt, "node failed, using fallback value");
                result.status = NodeStatus::Success;
                result.output = value.clone();
                ctx.record(result);
                ctx.mark_absorbed();
                return Outcome::Success {
                    value,
                    port: None,
                };
            }
            Verdict::Skip => {
                tracing::warn!(eid = %ctx.id(), nid = %node.id, kind = %err.kind, attempt, "node failed, skipping");
                result.status = NodeStatus::Skipped;
                result.reason = Some("skipped by error policy".to_string());
                ctx.record(result);
                ctx.mark_absorbed();
                return Outcome::Skipped;
            }
            Verdict::Branch(handler) => {
                tracing::warn!(eid = %ctx.id(), nid = %node.id, kind = %err.kind, attempt, handler = %handler, "node failed, branching to handler");
                ctx.record(result);
                ctx.mark_absorbed();
                return Outcome::Branch {
                    error: err,
                    handler,
                };
            }
            Verdict::Stop => {
                ctx.record(result);
                ctx.fail(format!("node '{}' failed: {}", node.id, err));
                return Outcome::Halted;
            }
        }
    }
}

/// Resolve the configuration and execute once, inside a concurrency slot and the node timeout.
async fn attempt_once(
    ctx: &Context,
    node: &Node,
    scope: &VariableScope,
    inputs: &[NodeInput],
    attempt: u32,
) -> Result<NodeOutput, NodeError> {
    let _permits = ctx.acquire().await;
    tracing::debug!(eid = %ctx.id(), nid = %node.id, kind = %node.uses, attempt, "dispatch node");

    let node_ctx = ctx.node_context(node, scope.clone(), attempt).with_inputs(inputs.to_vec());
    let work = async {
        let config = ctx.evaluator().resolve_value(&node.config, scope).await.map_err(NodeError::from)?;
        node.kind.execute(config, node_ctx).await
    };
    let work = AssertUnwindSafe(work).catch_unwind();

    let result = match node.timeout.or(ctx.options().default_timeout) {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => return Err(NodeError::timeout(limit.as_millis())),
        },
        None => work.await,
    };

    result.unwrap_or_else(|panic| Err(NodeError::execution(format!("node panicked: {}", panic_message(panic.as_ref())))))
}

async fn succeed(
    ctx: &Arc<Context>,
    node: &Node,
    scope: &VariableScope,
    output: NodeOutput,
    attempt: u32,
    started: Instant,
    iteration: Option<usize>,
) -> Outcome {
    if let Some(delay) = output.delay
        && !pause(ctx, delay).await
    {
        ctx.record_cancelled(node, iteration);
        return Outcome::Halted;
    }

    let value = if node.control() == Control::Loop {
        match iterate(ctx, node, scope, output.value).await {
            Some(value) => value,
            None => {
                ctx.record_cancelled(node, iteration);
                return Outcome::Halted;
            }
        }
    } else {
        output.value
    };

    let mut result = NodeResult::new(&node.id, &node.name, NodeStatus::Success);
    result.output = value.clone();
    result.duration_ms = started.elapsed().as_millis() as u64;
    result.retry_count = attempt;
    result.iteration = iteration;
    ctx.record(result);

    Outcome::Success {
        value,
        port: output.port,
    }
}

/// Run the loop body once per item, collecting one output per iteration.
/// Returns `None` when the execution halted midway.
async fn iterate(
    ctx: &Arc<Context>,
    node: &Node,
    scope: &VariableScope,
    items: Value,
) -> Option<Value> {
    let items = match items {
        Value::Array(items) => items,
        other => vec![other],
    };
    let sinks = ctx.plan().iteration_outputs(&node.id);

    let mut collected = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        if ctx.is_halted() {
            return None;
        }
        tracing::debug!(eid = %ctx.id(), nid = %node.id, index, "loop iteration");
        let body_scope = scope.with_loop(item.clone(), index);
        let outputs = Region::body(ctx.clone(), &node.id, body_scope, item, index).run().await;

        let mut values: Vec<Value> = sinks.iter().filter_map(|nid| outputs.get(nid).cloned()).collect();
        collected.push(match values.len() {
            0 => Value::Null,
            1 => values.remove(0),
            _ => Value::Array(values),
        });
    }

    if ctx.is_halted() { None } else { Some(Value::Array(collected)) }
}

/// Sleep unless the execution halts first. Returns false when halted.
async fn pause(
    ctx: &Context,
    delay: Duration,
) -> bool {
    tokio::select! {
        _ = ctx.halted() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
