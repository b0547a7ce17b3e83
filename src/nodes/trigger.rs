use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
};

/// Entry point of a workflow; outputs the payload the execution was started with.
pub struct TriggerNode;

#[async_trait]
impl NodeKind for TriggerNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::trigger("trigger")
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "defaults": { "type": "object", "description": "Values merged under the payload" }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let payload = ctx.scope.trigger().clone();
        let value = match (config.get("defaults"), payload) {
            (Some(Value::Object(defaults)), Value::Object(fields)) => {
                let mut merged = defaults.clone();
                merged.extend(fields);
                Value::Object(merged)
            }
            (Some(Value::Object(defaults)), Value::Null) => Value::Object(defaults.clone()),
            (_, payload) => payload,
        };
        Ok(NodeOutput::new(value))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{common::Vars, runtime::VariableScope};

    #[tokio::test]
    async fn test_payload_over_defaults() {
        let scope = VariableScope::new("e", "w", json!({ "a": 1 }), Vars::new(), HashMap::new(), HashMap::new());
        let ctx = NodeContext::new("t", "T", scope);
        let out = TriggerNode.execute(json!({ "defaults": { "a": 0, "b": 2 } }), ctx).await.unwrap();
        assert_eq!(out.value, json!({ "a": 1, "b": 2 }));
    }
}
