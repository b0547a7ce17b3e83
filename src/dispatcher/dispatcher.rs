//! Workflow dispatcher for one execution.
//!
//! The dispatcher is responsible for:
//! - Moving the execution record through its lifecycle
//! - Running the main region from the fired triggers
//! - Settling the terminal status once every branch finished

use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::{
    dispatcher::region::Region,
    events::{Message, WorkflowEvent, WorkflowStartEvent},
    runtime::Context,
    workflow::NodeId,
};

/// Workflow execution dispatcher.
pub struct Dispatcher {
    /// Execution context with the graph, plan and scope.
    ctx: Arc<Context>,
    /// Tokio runtime for spawning tasks.
    runtime: Arc<Runtime>,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<Context>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            ctx,
            runtime,
        }
    }

    /// Spawn the execution. `fired` lists the triggers that start it; every other
    /// trigger and the paths only it reaches are skipped.
    pub fn start(
        &self,
        fired: Vec<NodeId>,
    ) {
        let ctx = self.ctx.clone();

        self.runtime.spawn(async move {
            if let Err(err) = ctx.start() {
                ctx.fail(format!("failed to start execution: {}", err));
                ctx.finish();
                return;
            }

            ctx.channel().emit(Message::workflow(
                ctx.id(),
                WorkflowEvent::Start(WorkflowStartEvent {
                    node_ids: ctx.graph().node_ids(),
                    layers: ctx.plan().layers(),
                }),
            ));
            tracing::info!(eid = %ctx.id(), wid = %ctx.graph().id(), triggers = ?fired, "execution started");

            Region::main(ctx.clone(), fired).run().await;
            ctx.finish();
        });
    }
}
