//! Workflow engine - the main entry point for Nodeflow.
//!
//! The engine manages the lifecycle of workflow executions, including:
//! - Deploying and validating workflow definitions
//! - Starting executions from their triggers
//! - Answering execution queries from live state and the store
//! - Graceful shutdown coordination

mod monitor;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde_json::Value;
use tokio::{runtime::Runtime, sync::Semaphore};

use crate::{
    ChannelEvent, ChannelOptions, Config, NodeflowError, Result, StoreType,
    catalog::Catalog,
    common::{MemCache, Queue, Shutdown, Vars},
    dispatcher::Dispatcher,
    error::{GraphError, GraphErrorKind},
    gateway::GatewayRouter,
    model::WorkflowModel,
    runtime::{Channel, Context, ExecutionHandle, VariableScope},
    store::{
        DbStore, MemStore, PageData, Query, Store,
        data::{self, Execution, ExecutionStatus},
    },
    utils,
    workflow::{ExecutionPlan, NodeId, ValidationResult, WorkflowGraph, validate},
};

use monitor::Monitor;

/// Maximum number of live executions kept in memory.
const EXECUTION_CACHE_SIZE: usize = 2048;
/// Upper bound on log lines returned for one execution.
const LOG_QUERY_LIMIT: usize = 10_000;

/// Filter for [`Engine::list_executions`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ExecutionFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// The main workflow engine.
///
/// Engine is the central coordinator for Nodeflow, responsible for:
/// - Managing the tokio runtime for async execution
/// - Coordinating the event channel for pub/sub messaging
/// - Storing workflow definitions and execution records
/// - Creating and tracking executions
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
/// engine.launch();
///
/// engine.deploy(&workflow_model)?;
/// let execution = engine.run("workflow_id", json!({ "user": 7 }))?;
///
/// engine.shutdown();
/// ```
pub struct Engine {
    config: Config,
    catalog: Arc<Catalog>,
    gateway: Arc<GatewayRouter>,
    /// Event channel for broadcasting execution events.
    channel: Arc<Channel>,
    /// Storage for definitions, executions and logs.
    store: Arc<Store>,
    /// Background monitor for log persistence.
    monitor: Monitor,
    /// Queue for receiving execution completion notifications.
    complete_queue: Arc<Queue<String>>,
    /// Executions that have not finished yet.
    executions: Arc<MemCache<String, ExecutionHandle>>,
    /// Engine-wide concurrency limit, when configured.
    global_permits: Option<Arc<Semaphore>>,

    /// Flag indicating if the engine is running.
    running: Arc<AtomicBool>,
    /// Tokio runtime for async task execution.
    runtime: Arc<Runtime>,
    /// Shutdown coordinator for graceful termination.
    shutdown: Arc<Shutdown>,
}

impl Engine {
    pub(crate) fn new(
        config: Config,
        catalog: Catalog,
        gateway: GatewayRouter,
        runtime: Arc<Runtime>,
    ) -> Result<Self> {
        let store = Store::new();
        let db: Box<dyn DbStore> = match config.store.store_type {
            StoreType::Mem => Box::new(MemStore::new()),
        };
        db.init(&store)?;

        let store = Arc::new(store);
        let channel = Arc::new(Channel::new());
        let monitor = Monitor::new(store.clone(), channel.clone(), runtime.clone());
        let global_permits = config.engine.global_max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            gateway: Arc::new(gateway),
            channel,
            store,
            monitor,
            complete_queue: Queue::unbounded(),
            executions: Arc::new(MemCache::new(EXECUTION_CACHE_SIZE)),
            global_permits,
            running: Arc::new(AtomicBool::new(false)),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
        })
    }

    /// Starts the engine and begins processing events.
    ///
    /// This method:
    /// - Starts the log monitor
    /// - Begins listening on the event channel
    /// - Spawns a background task that forgets finished executions
    pub fn launch(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        // Register handlers first, then start listening
        self.monitor.monitor(self.shutdown.clone());
        self.channel.listen(&self.runtime);

        let complete_queue = self.complete_queue.clone();
        match ChannelEvent::channel(self.channel.clone(), ChannelOptions::default()) {
            Ok(events) => events.on_event(move |e| {
                if e.event.is_terminal()
                    && let Err(err) = complete_queue.send(e.eid.clone())
                {
                    tracing::error!(eid = %e.eid, error = %err, "failed to queue finished execution");
                }
            }),
            Err(err) => tracing::error!(error = %err, "failed to subscribe to execution events"),
        }

        let complete_queue = self.complete_queue.clone();
        let shutdown = self.shutdown.clone();
        let executions = self.executions.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Some(eid) = complete_queue.next_async() => {
                        executions.remove(&eid);
                    }
                }
            }
        });
        tracing::info!(threads = self.config.async_worker_thread_number, max_concurrency = self.config.engine.max_concurrency, "engine launched");
    }

    /// Gracefully shuts down the engine.
    ///
    /// This method:
    /// - Cancels every running execution
    /// - Signals all components to stop
    /// - Shuts down the event channel
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for (_, execution) in self.executions.iter() {
            execution.cancel();
        }
        self.shutdown.shutdown();
        self.channel.shutdown();
        tracing::info!("engine shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Saves a workflow definition to the store, replacing an earlier one with the same id.
    pub fn deploy(
        &self,
        workflow: &WorkflowModel,
    ) -> Result<bool> {
        self.store.deploy(workflow)
    }

    /// Validate a definition against the engine's catalog, collecting every error.
    pub fn validate(
        &self,
        workflow: &WorkflowModel,
    ) -> ValidationResult {
        validate(workflow, &self.catalog)
    }

    /// Scheduling plan of a deployed workflow.
    pub fn plan(
        &self,
        wid: &str,
    ) -> Result<ExecutionPlan> {
        let (_, graph) = self.load(wid)?;
        Ok(ExecutionPlan::build(&graph)?)
    }

    /// Start an execution firing every trigger of the workflow. Returns the execution id.
    ///
    /// Structural errors are returned here and no execution record is created.
    pub fn start_execution(
        &self,
        wid: &str,
        payload: Value,
    ) -> Result<String> {
        self.start(wid, None, payload)
    }

    /// Start an execution from one trigger; paths only reachable from the others are skipped.
    pub fn start_execution_from(
        &self,
        wid: &str,
        trigger_id: &str,
        payload: Value,
    ) -> Result<String> {
        self.start(wid, Some(trigger_id), payload)
    }

    fn start(
        &self,
        wid: &str,
        trigger_id: Option<&str>,
        payload: Value,
    ) -> Result<String> {
        if !self.is_running() {
            return Err(NodeflowError::Engine("engine is not running".to_string()));
        }

        let (model, graph) = self.load(wid)?;
        let plan = ExecutionPlan::build(&graph)?;
        let triggers = graph.triggers();
        let fired: Vec<NodeId> = match trigger_id {
            Some(tid) if triggers.iter().any(|t| t == tid) => vec![tid.to_string()],
            Some(tid) => return Err(GraphError::at(GraphErrorKind::DanglingReference, tid, "trigger node not found").into()),
            None => triggers,
        };

        let eid = utils::longid();
        let scope = VariableScope::new(&eid, &model.id, payload.clone(), Vars::from(Value::Object(model.variables.clone())), model.env.clone(), graph.names());
        let execution = Execution {
            id: eid.clone(),
            wid: model.id.clone(),
            workflow_version: model.version,
            trigger: payload,
            status: ExecutionStatus::Pending,
            start_time: 0,
            end_time: 0,
            results: Vec::new(),
            error: None,
            timestamp: utils::time::time_millis(),
        };
        self.store.executions()?.create(&execution)?;

        let ctx = Arc::new(Context::new(
            execution,
            Arc::new(graph),
            Arc::new(plan),
            scope,
            self.channel.clone(),
            self.store.clone(),
            Some(self.gateway.clone()),
            self.config.engine.max_concurrency,
            self.global_permits.clone(),
            self.config.engine.execution_options(),
        ));
        self.executions.set(eid.clone(), ExecutionHandle::new(ctx.clone()));
        tracing::debug!(eid = %eid, wid = %wid, "execution created");

        Dispatcher::new(ctx, self.runtime.clone()).start(fired);
        Ok(eid)
    }

    /// Load a deployed definition, validate it and build its graph.
    fn load(
        &self,
        wid: &str,
    ) -> Result<(WorkflowModel, WorkflowGraph)> {
        let model = self.store.load_workflow(wid)?;
        validate(&model, &self.catalog).into_result()?;
        let graph = WorkflowGraph::build(&model, &self.catalog)?;
        Ok((model, graph))
    }

    /// Wait for an execution to reach its terminal status.
    pub async fn wait(
        &self,
        eid: &str,
    ) -> Result<Execution> {
        if let Some(handle) = self.executions.get(&eid.to_string()) {
            return Ok(handle.wait().await);
        }
        let execution = self.store.executions()?.find(eid)?;
        if execution.status.is_terminal() {
            Ok(execution)
        } else {
            Err(NodeflowError::Execution(format!("execution {} is no longer tracked", eid)))
        }
    }

    /// Blocking [`Engine::wait`]. Must not be called from inside the engine's runtime.
    pub fn wait_blocking(
        &self,
        eid: &str,
    ) -> Result<Execution> {
        self.runtime.block_on(self.wait(eid))
    }

    /// Start an execution and block until it finishes.
    pub fn run(
        &self,
        wid: &str,
        payload: Value,
    ) -> Result<Execution> {
        let eid = self.start_execution(wid, payload)?;
        self.wait_blocking(&eid)
    }

    /// Request cancellation. Returns false when the execution already finished.
    pub fn cancel(
        &self,
        eid: &str,
    ) -> Result<bool> {
        if let Some(handle) = self.executions.get(&eid.to_string()) {
            return Ok(handle.cancel());
        }
        let execution = self.store.executions()?.find(eid)?;
        if execution.status.is_terminal() {
            Ok(false)
        } else {
            Err(NodeflowError::Execution(format!("execution {} is no longer tracked", eid)))
        }
    }

    /// Current state of an execution: the live record while it runs, the stored one afterwards.
    pub fn get_execution(
        &self,
        eid: &str,
    ) -> Result<Execution> {
        match self.executions.get(&eid.to_string()) {
            Some(handle) => Ok(handle.snapshot()),
            None => self.store.executions()?.find(eid),
        }
    }

    /// Executions of a workflow, newest first.
    pub fn list_executions(
        &self,
        wid: &str,
        filter: ExecutionFilter,
    ) -> Result<PageData<Execution>> {
        let mut query = Query::new().filter("wid", wid);
        if let Some(status) = filter.status {
            query = query.filter("status", status.as_ref());
        }
        let query = query.order("timestamp", true).set_limit(filter.limit).set_offset(filter.offset);

        let mut page = self.store.executions()?.query(&query)?;
        for row in page.rows.iter_mut() {
            if let Some(handle) = self.executions.get(&row.id) {
                *row = handle.snapshot();
            }
        }
        Ok(page)
    }

    /// Log lines persisted for an execution, oldest first.
    pub fn logs(
        &self,
        eid: &str,
    ) -> Result<Vec<data::Log>> {
        let query = Query::new().filter("eid", eid).order("timestamp", false).set_limit(LOG_QUERY_LIMIT);
        Ok(self.store.logs()?.query(&query)?.rows)
    }

    /// Handle of an execution that is still running.
    pub fn execution(
        &self,
        eid: &str,
    ) -> Option<ExecutionHandle> {
        self.executions.get(&eid.to_string())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns a reference to the event channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }
}
