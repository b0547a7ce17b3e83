use async_trait::async_trait;
use serde_json::Value;

use crate::{
    catalog::{Control, NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
};

/// Fan-out point: passes its input through to every successor at once.
pub struct ParallelNode;

#[async_trait]
impl NodeKind for ParallelNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("parallel").with_control(Control::Parallel)
    }

    async fn execute(
        &self,
        _config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(ctx.input().clone()))
    }
}
