use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    Result,
    catalog::NodeContext,
    common::Shutdown,
    events::{Message, NodeEvent, WorkflowEvent, WorkflowFailedEvent},
    expression::Evaluator,
    gateway::GatewayRouter,
    runtime::{Channel, VariableScope},
    store::{
        Store,
        data::{Execution, ExecutionStatus, NodeResult},
    },
    utils,
    workflow::{ExecutionPlan, Node, WorkflowGraph},
};

/// Per-execution limits taken from the engine configuration.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub cancel_grace: Duration,
    pub default_timeout: Option<Duration>,
    pub loop_max_iterations: usize,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_millis(5000),
            default_timeout: None,
            loop_max_iterations: 1000,
        }
    }
}

/// Concurrency slots held while a node attempt runs.
pub struct Permits {
    _local: Option<OwnedSemaphorePermit>,
    _global: Option<OwnedSemaphorePermit>,
}

/// State shared by everything running inside one execution.
pub struct Context {
    eid: String,
    graph: Arc<WorkflowGraph>,
    plan: Arc<ExecutionPlan>,
    scope: VariableScope,
    channel: Arc<Channel>,
    store: Arc<Store>,
    evaluator: Evaluator,
    gateway: Option<Arc<GatewayRouter>>,
    permits: Arc<Semaphore>,
    global_permits: Option<Arc<Semaphore>>,
    options: ExecutionOptions,

    execution: Mutex<Execution>,
    /// flips on cancel or stop; nothing new is dispatched afterwards
    halt: Shutdown,
    done: Shutdown,
    cancelled: AtomicBool,
    failed: AtomicBool,
    absorbed: AtomicBool,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution: Execution,
        graph: Arc<WorkflowGraph>,
        plan: Arc<ExecutionPlan>,
        scope: VariableScope,
        channel: Arc<Channel>,
        store: Arc<Store>,
        gateway: Option<Arc<GatewayRouter>>,
        max_concurrency: usize,
        global_permits: Option<Arc<Semaphore>>,
        options: ExecutionOptions,
    ) -> Self {
        let evaluator = match &gateway {
            Some(gateway) => Evaluator::with_gateway(gateway.clone()),
            None => Evaluator::new(),
        };
        Self {
            eid: execution.id.clone(),
            graph,
            plan,
            scope,
            channel,
            store,
            evaluator,
            gateway,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            global_permits,
            options,
            execution: Mutex::new(execution),
            halt: Shutdown::new(),
            done: Shutdown::new(),
            cancelled: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            absorbed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.eid
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn scope(&self) -> &VariableScope {
        &self.scope
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Node-facing context for one attempt.
    pub fn node_context(
        &self,
        node: &Node,
        scope: VariableScope,
        attempt: u32,
    ) -> NodeContext {
        let mut ctx = NodeContext::new(&node.id, &node.name, scope).with_gateway(self.gateway.clone()).with_channel(self.channel.clone());
        ctx.attempt = attempt;
        ctx.loop_max_iterations = self.options.loop_max_iterations;
        ctx
    }

    /// Wait for a slot in this execution and, when configured, in the whole engine.
    pub async fn acquire(&self) -> Permits {
        let global = match &self.global_permits {
            Some(sem) => sem.clone().acquire_owned().await.ok(),
            None => None,
        };
        let local = self.permits.clone().acquire_owned().await.ok();
        Permits {
            _local: local,
            _global: global,
        }
    }

    pub fn node_running(
        &self,
        nid: &str,
        attempt: u32,
    ) {
        self.channel.emit(Message::node(&self.eid, nid, NodeEvent::Running(attempt)));
    }

    /// Append a node result and publish it.
    pub fn record(
        &self,
        result: NodeResult,
    ) {
        tracing::debug!(eid = %self.eid, nid = %result.node_id, status = %result.status, "node result");
        if let Ok(mut execution) = self.execution.lock() {
            execution.results.push(result.clone());
        }
        self.channel.emit(Message::node(&self.eid, &result.node_id.clone(), NodeEvent::Result(result)));
    }

    /// Record the abort of an in-flight node.
    pub fn record_cancelled(
        &self,
        node: &Node,
        iteration: Option<usize>,
    ) {
        let mut result = NodeResult::skipped(&node.id, &node.name, "cancelled");
        result.iteration = iteration;
        self.record(result);
    }

    /// A failure was absorbed by policy.
    pub fn mark_absorbed(&self) {
        self.absorbed.store(true, Ordering::SeqCst);
    }

    /// An unhandled failure ends the execution.
    pub fn fail(
        &self,
        error: String,
    ) {
        tracing::error!(eid = %self.eid, error = %error, "execution failed");
        if let Ok(mut execution) = self.execution.lock()
            && execution.error.is_none()
        {
            execution.error = Some(error);
        }
        self.failed.store(true, Ordering::SeqCst);
        self.halt.shutdown();
    }

    /// External cancellation request. Returns false once the execution finished.
    pub fn cancel(&self) -> bool {
        if self.done.is_terminated() {
            return false;
        }
        tracing::info!(eid = %self.eid, "execution cancel requested");
        self.cancelled.store(true, Ordering::SeqCst);
        self.halt.shutdown();
        true
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_terminated()
    }

    pub fn halted(&self) -> impl Future<Output = ()> + Send + 'static {
        self.halt.wait()
    }

    pub fn is_done(&self) -> bool {
        self.done.is_terminated()
    }

    pub fn wait_done(&self) -> impl Future<Output = ()> + Send + 'static {
        self.done.wait()
    }

    pub fn snapshot(&self) -> Execution {
        match self.execution.lock() {
            Ok(execution) => execution.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Move the record to `running` and persist it.
    pub fn start(&self) -> Result<()> {
        if let Ok(mut execution) = self.execution.lock() {
            execution.status = ExecutionStatus::Running;
            execution.start_time = utils::time::time_millis();
        }
        self.persist()
    }

    /// Settle the terminal status, persist the record and publish the terminal event.
    pub fn finish(&self) -> ExecutionStatus {
        let status = if self.cancelled.load(Ordering::SeqCst) {
            ExecutionStatus::Cancelled
        } else if self.failed.load(Ordering::SeqCst) {
            ExecutionStatus::Failed
        } else if self.absorbed.load(Ordering::SeqCst) {
            ExecutionStatus::PartialFailure
        } else {
            ExecutionStatus::Completed
        };

        let mut error = None;
        if let Ok(mut execution) = self.execution.lock() {
            execution.status = status;
            execution.end_time = utils::time::time_millis();
            error = execution.error.clone();
        }
        if let Err(err) = self.persist() {
            tracing::error!(eid = %self.eid, error = %err, "failed to persist execution");
        }

        let event = match status {
            ExecutionStatus::Cancelled => WorkflowEvent::Cancelled,
            ExecutionStatus::Failed => WorkflowEvent::Failed(WorkflowFailedEvent {
                error: error.unwrap_or_default(),
            }),
            ExecutionStatus::PartialFailure => WorkflowEvent::PartialFailure,
            _ => WorkflowEvent::Completed,
        };
        tracing::info!(eid = %self.eid, wid = %self.graph.id(), status = %status, "execution finished");
        self.channel.emit(Message::workflow(&self.eid, event));
        self.done.shutdown();
        status
    }

    fn persist(&self) -> Result<()> {
        let execution = self.snapshot();
        self.store.executions()?.update(&execution)?;
        Ok(())
    }
}

