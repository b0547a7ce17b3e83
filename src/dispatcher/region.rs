//! Ready-set scheduling of one region: the main graph, or one iteration of a loop body.

use std::{
    collections::{HashMap, HashSet},
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use serde_json::Value;
use tokio::task::{AbortHandle, JoinSet};

use crate::{
    catalog::{Control, NodeInput},
    dispatcher::worker::{Outcome, run_node},
    nodes::MergeMode,
    runtime::{Context, VariableScope},
    store::data::{NodeResult, NodeStatus},
    workflow::{NodeId, plan::EdgeIdx},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Done,
}

/// What travels along a taken edge.
#[derive(Debug, Clone)]
struct Activation {
    status: NodeStatus,
    value: Value,
}

#[derive(Debug, Clone)]
enum EdgeState {
    Pending,
    Taken(Activation),
    Skipped,
}

enum Readiness {
    Ready,
    Wait,
    Skip(&'static str),
}

pub(crate) struct Region {
    ctx: Arc<Context>,
    owner: Option<NodeId>,
    scope: VariableScope,
    iteration: Option<usize>,
    nodes: Vec<NodeId>,
    members: HashSet<NodeId>,
    inputs: HashMap<NodeId, Vec<EdgeIdx>>,
    state: HashMap<NodeId, NodeState>,
    edges: HashMap<EdgeIdx, EdgeState>,
    /// nodes without inputs that are allowed to start
    entry: HashSet<NodeId>,
    set: JoinSet<(NodeId, Outcome)>,
    running: HashMap<NodeId, AbortHandle>,
    outputs: HashMap<NodeId, Value>,
}

impl Region {
    fn new(
        ctx: Arc<Context>,
        owner: Option<NodeId>,
        scope: VariableScope,
        iteration: Option<usize>,
    ) -> Self {
        let plan = ctx.plan();
        let nodes = plan.region(owner.as_deref()).to_vec();
        let inputs = nodes.iter().map(|nid| (nid.clone(), plan.region_inputs(nid))).collect();
        let state = nodes.iter().map(|nid| (nid.clone(), NodeState::Pending)).collect();
        let members = nodes.iter().cloned().collect();
        Self {
            ctx,
            owner,
            scope,
            iteration,
            nodes,
            members,
            inputs,
            state,
            edges: HashMap::new(),
            entry: HashSet::new(),
            set: JoinSet::new(),
            running: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// The main region, started from the fired triggers.
    pub(crate) fn main(
        ctx: Arc<Context>,
        fired: Vec<NodeId>,
    ) -> Self {
        let scope = ctx.scope().clone();
        let mut region = Self::new(ctx, None, scope, None);
        region.entry = fired.into_iter().collect();
        region
    }

    /// One iteration of a loop body; the entry edges carry the current item.
    pub(crate) fn body(
        ctx: Arc<Context>,
        loop_id: &str,
        scope: VariableScope,
        item: Value,
        index: usize,
    ) -> Self {
        let entries = ctx.plan().body_entries(loop_id);
        let mut region = Self::new(ctx, Some(loop_id.to_string()), scope, Some(index));
        for idx in entries {
            region.edges.insert(
                idx,
                EdgeState::Taken(Activation {
                    status: NodeStatus::Success,
                    value: item.clone(),
                }),
            );
        }
        region
    }

    /// Run until nothing is left to dispatch. Returns the outputs produced in this region.
    pub(crate) fn run(mut self) -> BoxFuture<'static, HashMap<NodeId, Value>> {
        async move {
            loop {
                if !self.ctx.is_halted() {
                    self.advance();
                }
                if self.set.is_empty() {
                    break;
                }
                if self.ctx.is_halted() {
                    self.drain().await;
                    break;
                }

                let halted = self.ctx.halted();
                let joined = tokio::select! {
                    _ = halted => None,
                    joined = self.set.join_next() => joined,
                };
                if let Some(Ok((nid, outcome))) = joined {
                    self.complete(nid, outcome);
                }
            }
            tracing::debug!(eid = %self.ctx.id(), region = self.owner.as_deref().unwrap_or("main"), "region settled");
            self.outputs
        }
        .boxed()
    }

    /// Dispatch or skip every pending node whose inputs allow it, until nothing changes.
    fn advance(&mut self) {
        loop {
            let mut progressed = false;
            for nid in self.nodes.clone() {
                if self.state.get(&nid) != Some(&NodeState::Pending) {
                    continue;
                }
                match self.readiness(&nid) {
                    Readiness::Ready => {
                        self.dispatch(&nid);
                        progressed = true;
                    }
                    Readiness::Skip(reason) => {
                        self.skip(&nid, reason);
                        progressed = true;
                    }
                    Readiness::Wait => {}
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn readiness(
        &self,
        nid: &str,
    ) -> Readiness {
        let inputs = self.inputs.get(nid).map(Vec::as_slice).unwrap_or_default();
        if inputs.is_empty() {
            return if self.entry.contains(nid) { Readiness::Ready } else { Readiness::Skip("trigger not fired") };
        }

        let taken = inputs.iter().any(|idx| matches!(self.edges.get(idx), Some(EdgeState::Taken(_))));
        if taken && self.is_wait_any(nid) {
            return Readiness::Ready;
        }
        let resolved = inputs.iter().all(|idx| !matches!(self.edges.get(idx), None | Some(EdgeState::Pending)));
        match (resolved, taken) {
            (false, _) => Readiness::Wait,
            (true, true) => Readiness::Ready,
            (true, false) => Readiness::Skip("branch not taken"),
        }
    }

    fn is_wait_any(
        &self,
        nid: &str,
    ) -> bool {
        self.ctx
            .graph()
            .node(nid)
            .is_some_and(|node| node.control() == Control::Merge && MergeMode::from_config(&node.config) == MergeMode::WaitAny)
    }

    fn dispatch(
        &mut self,
        nid: &str,
    ) {
        let Some(node) = self.ctx.graph().node(nid).cloned() else {
            self.state.insert(nid.to_string(), NodeState::Done);
            return;
        };
        if self.is_wait_any(nid) {
            self.cancel_siblings(nid);
        }

        let plan = self.ctx.plan();
        let mut inputs = Vec::new();
        let mut taken = Vec::new();
        for idx in self.inputs.get(nid).cloned().unwrap_or_default() {
            let edge = plan.edge(idx);
            let (status, value) = match self.edges.get(&idx) {
                Some(EdgeState::Taken(activation)) => {
                    taken.push(activation.value.clone());
                    (activation.status, activation.value.clone())
                }
                _ => (NodeStatus::Skipped, Value::Null),
            };
            inputs.push(NodeInput {
                source: edge.source.clone(),
                port: edge.source_port.clone(),
                status,
                value,
            });
        }
        let prev = match taken.len() {
            0 => Value::Null,
            1 => taken.remove(0),
            _ => Value::Array(taken),
        };

        self.state.insert(nid.to_string(), NodeState::Running);
        let ctx = self.ctx.clone();
        let scope = self.scope.with_prev(prev);
        let iteration = self.iteration;
        let task_id = nid.to_string();
        let handle = self.set.spawn(async move {
            let name = node.id.clone();
            let outcome = AssertUnwindSafe(run_node(ctx.clone(), node, scope, inputs, iteration)).catch_unwind().await.unwrap_or_else(|_| {
                ctx.fail(format!("node '{}' panicked outside its execution", name));
                Outcome::Halted
            });
            (task_id, outcome)
        });
        self.running.insert(nid.to_string(), handle);
    }

    /// Outgoing edges that stay inside this region.
    fn region_outputs(
        &self,
        nid: &str,
    ) -> Vec<EdgeIdx> {
        let plan = self.ctx.plan();
        plan.outgoing(nid).iter().copied().filter(|idx| !plan.is_back_edge(*idx) && self.members.contains(&plan.edge(*idx).target)).collect()
    }

    fn skip(
        &mut self,
        nid: &str,
        reason: &str,
    ) {
        self.state.insert(nid.to_string(), NodeState::Done);
        if let Some(node) = self.ctx.graph().node(nid) {
            let mut result = NodeResult::skipped(&node.id, &node.name, reason);
            result.iteration = self.iteration;
            self.ctx.record(result);
        }
        for idx in self.region_outputs(nid) {
            self.edges.insert(idx, EdgeState::Skipped);
        }
    }

    /// Resolve the outgoing edges of a finished node.
    fn complete(
        &mut self,
        nid: NodeId,
        outcome: Outcome,
    ) {
        self.running.remove(&nid);
        if self.state.get(&nid) == Some(&NodeState::Done) {
            return;
        }
        self.state.insert(nid.clone(), NodeState::Done);

        let outgoing = self.region_outputs(&nid);
        let plan = self.ctx.plan();
        let mut resolved = Vec::with_capacity(outgoing.len());
        match outcome {
            Outcome::Success {
                value,
                port,
            } => {
                self.scope.set_output(&nid, value.clone());
                for idx in outgoing {
                    let edge = plan.edge(idx);
                    let take = match &port {
                        Some(port) => edge.source_port == *port,
                        None => !edge.is_error(),
                    };
                    let state = if take {
                        EdgeState::Taken(Activation {
                            status: NodeStatus::Success,
                            value: value.clone(),
                        })
                    } else {
                        EdgeState::Skipped
                    };
                    resolved.push((idx, state));
                }
                self.outputs.insert(nid, value);
            }
            Outcome::Skipped => {
                for idx in outgoing {
                    let state = if plan.edge(idx).is_error() {
                        EdgeState::Skipped
                    } else {
                        EdgeState::Taken(Activation {
                            status: NodeStatus::Skipped,
                            value: Value::Null,
                        })
                    };
                    resolved.push((idx, state));
                }
            }
            Outcome::Branch {
                error,
                handler,
            } => {
                let value = serde_json::to_value(&error).unwrap_or(Value::Null);
                for idx in outgoing {
                    let edge = plan.edge(idx);
                    let state = if edge.is_error() && edge.target == handler {
                        EdgeState::Taken(Activation {
                            status: NodeStatus::Failed,
                            value: value.clone(),
                        })
                    } else {
                        EdgeState::Skipped
                    };
                    resolved.push((idx, state));
                }
            }
            Outcome::Halted => {}
        }
        self.edges.extend(resolved);
    }

    /// A `wait_any` merge fired: cut its unresolved inputs and cancel the
    /// upstream work that only existed to feed it.
    fn cancel_siblings(
        &mut self,
        merge: &str,
    ) {
        let plan = self.ctx.plan();
        let mut pending = Vec::new();
        for idx in self.inputs.get(merge).cloned().unwrap_or_default() {
            if matches!(self.edges.get(&idx), None | Some(EdgeState::Pending)) {
                self.edges.insert(idx, EdgeState::Skipped);
                pending.push(plan.edge(idx).source.clone());
            }
        }

        let mut doomed: HashSet<NodeId> = HashSet::from([merge.to_string()]);
        while let Some(nid) = pending.pop() {
            if doomed.contains(&nid) {
                continue;
            }
            let state = self.state.get(&nid).copied();
            if !matches!(state, Some(NodeState::Pending | NodeState::Running)) {
                continue;
            }
            let outgoing = self.region_outputs(&nid);
            if !outgoing.iter().all(|idx| doomed.contains(&plan.edge(*idx).target)) {
                continue;
            }
            doomed.insert(nid.clone());

            if let Some(handle) = self.running.remove(&nid) {
                handle.abort();
            }
            if let Some(node) = self.ctx.graph().node(&nid) {
                tracing::debug!(eid = %self.ctx.id(), nid = %nid, merge, "cancelled by wait_any merge");
                self.ctx.record_cancelled(node, self.iteration);
            }
            self.state.insert(nid.clone(), NodeState::Done);
            for idx in outgoing {
                self.edges.insert(idx, EdgeState::Skipped);
            }
            for idx in self.inputs.get(&nid).cloned().unwrap_or_default() {
                if matches!(self.edges.get(&idx), None | Some(EdgeState::Pending)) {
                    pending.push(plan.edge(idx).source.clone());
                }
            }
        }
    }

    /// Give in-flight nodes the grace window, then abort the rest.
    async fn drain(&mut self) {
        let deadline = tokio::time::sleep(self.ctx.options().cancel_grace);
        tokio::pin!(deadline);
        while !self.set.is_empty() {
            let joined = tokio::select! {
                _ = &mut deadline => break,
                joined = self.set.join_next() => joined,
            };
            if let Some(Ok((nid, outcome))) = joined {
                self.complete(nid, outcome);
            }
        }
        while let Some(joined) = self.set.try_join_next() {
            if let Ok((nid, outcome)) = joined {
                self.complete(nid, outcome);
            }
        }

        self.set.abort_all();
        let mut aborted: Vec<NodeId> = self.running.drain().map(|(nid, _)| nid).collect();
        aborted.sort_by_key(|nid| self.ctx.graph().position(nid));
        for nid in aborted {
            tracing::warn!(eid = %self.ctx.id(), nid = %nid, "node aborted after cancel grace");
            if let Some(node) = self.ctx.graph().node(&nid) {
                self.ctx.record_cancelled(node, self.iteration);
            }
            self.state.insert(nid, NodeState::Done);
        }
    }
}
