use std::sync::Arc;

use crate::{
    runtime::Context,
    store::data::{Execution, ExecutionStatus},
};

/// A running (or just finished) execution held by the engine.
#[derive(Clone)]
pub struct ExecutionHandle {
    ctx: Arc<Context>,
}

impl ExecutionHandle {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        self.ctx.id()
    }

    pub fn wid(&self) -> &str {
        self.ctx.graph().id()
    }

    /// Request cancellation. Returns false once the execution finished.
    pub fn cancel(&self) -> bool {
        self.ctx.cancel()
    }

    pub fn is_complete(&self) -> bool {
        self.ctx.is_done()
    }

    /// Wait for the terminal status and return the final record.
    pub async fn wait(&self) -> Execution {
        self.ctx.wait_done().await;
        self.ctx.snapshot()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.ctx.snapshot().status
    }

    /// Current state of the record, including the results appended so far.
    pub fn snapshot(&self) -> Execution {
        self.ctx.snapshot()
    }
}
