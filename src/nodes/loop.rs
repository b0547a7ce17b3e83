use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    catalog::{Control, NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
    model::MAIN_PORT,
};

/// Output port feeding the loop body.
pub const LOOP_BODY_PORT: &str = "body";
/// Input port closing an iteration.
pub const LOOP_BACK_PORT: &str = "loop";

/// Iterates its body over a sequence of items.
///
/// `execute` only resolves and bounds the sequence; the scheduler runs the body
/// region once per item and replaces the output with the collected iteration results.
pub struct LoopNode;

#[async_trait]
impl NodeKind for LoopNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("loop").with_control(Control::Loop).with_inputs(&[MAIN_PORT, LOOP_BACK_PORT]).with_outputs(&[LOOP_BODY_PORT, MAIN_PORT])
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["items"],
            "properties": {
                "items": { "type": ["array", "object", "null"] },
                "max_iterations": { "type": "integer", "minimum": 0 }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let items = match config.get("items") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Object(map)) => map.iter().map(|(k, v)| json!({ "key": k, "value": v })).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(NodeError::validation(format!("'items' must resolve to an array, got {}", other))),
        };

        let max = config.get("max_iterations").and_then(Value::as_u64).map_or(ctx.loop_max_iterations, |m| m as usize);
        if items.len() > max {
            return Err(NodeError::resource(format!("loop over {} items exceeds max_iterations {}", items.len(), max)));
        }

        Ok(NodeOutput::new(Value::Array(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::NodeErrorKind, nodes::tests::context};

    #[tokio::test]
    async fn test_items_normalized_and_bounded() {
        let out = LoopNode.execute(json!({ "items": [1, 2] }), context(Value::Null)).await.unwrap();
        assert_eq!(out.value, json!([1, 2]));

        let out = LoopNode.execute(json!({ "items": { "a": 1 } }), context(Value::Null)).await.unwrap();
        assert_eq!(out.value, json!([{ "key": "a", "value": 1 }]));

        let err = LoopNode.execute(json!({ "items": [1, 2, 3], "max_iterations": 2 }), context(Value::Null)).await.unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::ResourceError);

        let mut ctx = context(Value::Null);
        ctx.loop_max_iterations = 1;
        assert!(LoopNode.execute(json!({ "items": [1, 2] }), ctx).await.is_err());

        assert!(LoopNode.execute(json!({ "items": "abc" }), context(Value::Null)).await.is_err());
    }
}
