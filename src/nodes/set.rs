use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
};

/// Produces a fixed (or expression-built) object, optionally layered over its input.
pub struct SetNode;

#[async_trait]
impl NodeKind for SetNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("set")
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["values"],
            "properties": {
                "values": { "type": "object" },
                "keep_input": { "type": "boolean" }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let values = match config.get("values") {
            Some(Value::Object(values)) => values.clone(),
            _ => return Err(NodeError::validation("'values' must be an object")),
        };
        let keep_input = config.get("keep_input").and_then(Value::as_bool).unwrap_or(false);

        let value = match ctx.input() {
            Value::Object(input) if keep_input => {
                let mut merged = input.clone();
                merged.extend(values);
                Value::Object(merged)
            }
            _ => Value::Object(values),
        };
        Ok(NodeOutput::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::context;

    #[tokio::test]
    async fn test_set_values() {
        let out = SetNode.execute(json!({ "values": { "b": 2 } }), context(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(out.value, json!({ "b": 2 }));

        let out = SetNode.execute(json!({ "values": { "b": 2 }, "keep_input": true }), context(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(out.value, json!({ "a": 1, "b": 2 }));
    }
}
