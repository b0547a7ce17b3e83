use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
};

/// Holds its branch for a while. The scheduler does the waiting, outside any concurrency slot.
pub struct WaitNode;

#[async_trait]
impl NodeKind for WaitNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("wait")
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["duration_ms"],
            "properties": {
                "duration_ms": { "type": "integer", "minimum": 0 }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let ms = config
            .get("duration_ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| NodeError::validation("'duration_ms' must be a non-negative integer"))?;
        Ok(NodeOutput::new(ctx.input().clone()).with_delay(Duration::from_millis(ms)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::context;

    #[tokio::test]
    async fn test_wait_returns_delay() {
        let out = WaitNode.execute(json!({ "duration_ms": 25 }), context(json!("x"))).await.unwrap();
        assert_eq!(out.delay, Some(Duration::from_millis(25)));
        assert_eq!(out.value, json!("x"));
        assert!(WaitNode.execute(json!({ "duration_ms": -1 }), context(json!("x"))).await.is_err());
    }
}
