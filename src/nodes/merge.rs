use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    catalog::{Control, NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergeMode {
    /// Fire once every incoming edge resolved.
    #[default]
    WaitAll,
    /// Fire on the first taken edge and cancel the rest.
    WaitAny,
}

impl MergeMode {
    pub fn from_config(config: &Value) -> Self {
        config.get("mode").and_then(|m| serde_json::from_value(m.clone()).ok()).unwrap_or_default()
    }
}

/// Barrier joining several branches. Outputs one entry per incoming edge, in declaration order.
pub struct MergeNode;

#[async_trait]
impl NodeKind for MergeNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("merge").with_control(Control::Merge)
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "enum": ["wait_all", "wait_any"] },
                "inputs": { "type": "integer", "minimum": 1 }
            }
        })
    }

    async fn execute(
        &self,
        _config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let inputs = ctx
            .inputs
            .iter()
            .map(|input| {
                json!({
                    "source": input.source,
                    "status": input.status,
                    "value": input.value,
                })
            })
            .collect();
        Ok(NodeOutput::new(Value::Array(inputs)))
    }
}
