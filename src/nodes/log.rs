use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
    events::LogLevel,
    expression::render,
};

#[derive(Deserialize)]
struct LogConfig {
    message: Value,
    #[serde(default)]
    level: LogLevel,
}

/// Writes a line to the execution log.
pub struct LogNode;

#[async_trait]
impl NodeKind for LogNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("log")
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["message"],
            "properties": {
                "message": { "description": "Text to log; non-string values are logged as JSON" },
                "level": { "type": "string", "enum": ["debug", "info", "warn", "error"] }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let config: LogConfig = serde_json::from_value(config)?;
        let message = render(&config.message);

        match config.level {
            LogLevel::Debug => tracing::debug!(eid = %ctx.execution_id, nid = %ctx.node_id, "{}", message),
            LogLevel::Info => tracing::info!(eid = %ctx.execution_id, nid = %ctx.node_id, "{}", message),
            LogLevel::Warn => tracing::warn!(eid = %ctx.execution_id, nid = %ctx.node_id, "{}", message),
            LogLevel::Error => tracing::error!(eid = %ctx.execution_id, nid = %ctx.node_id, "{}", message),
        }
        ctx.emit_log(config.level, message.clone());

        Ok(NodeOutput::new(json!({ "message": message, "level": config.level })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::context;

    #[tokio::test]
    async fn test_log_renders_message() {
        let out = LogNode.execute(json!({ "message": { "n": 1 }, "level": "warn" }), context(Value::Null)).await.unwrap();
        assert_eq!(out.value, json!({ "message": "{\"n\":1}", "level": "warn" }));

        let err = LogNode.execute(json!({ "level": "loud" }), context(Value::Null)).await.unwrap_err();
        assert_eq!(err.kind, crate::error::NodeErrorKind::ValidationError);
    }
}
