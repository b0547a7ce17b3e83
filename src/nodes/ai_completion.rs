use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    catalog::{NodeContext, NodeDescriptor, NodeKind, NodeOutput},
    error::NodeError,
    gateway::{GatewayRequest, GenerationParams, classify},
};

#[derive(Deserialize)]
struct AiCompletionConfig {
    prompt: String,
    #[serde(default)]
    task: Option<String>,
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default, flatten)]
    params: GenerationParams,
    #[serde(default)]
    providers: Vec<String>,
}

/// Sends a prompt through the engine's inference gateway.
pub struct AiCompletionNode;

#[async_trait]
impl NodeKind for AiCompletionNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::task("ai_completion")
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["prompt"],
            "properties": {
                "prompt": { "type": "string" },
                "task": { "type": "string" },
                "system": { "type": "string" },
                "content": {},
                "model": { "type": "string" },
                "max_tokens": { "type": "integer", "minimum": 1 },
                "temperature": { "type": "number", "minimum": 0 },
                "providers": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let config: AiCompletionConfig = serde_json::from_value(config)?;
        let gateway = ctx.gateway().ok_or_else(|| NodeError::execution("no inference gateway is configured"))?;

        let mut request = GatewayRequest::new(config.task.as_deref().unwrap_or("completion"), config.prompt);
        request.system = config.system;
        request.content = config.content;
        request.params = config.params;
        request.providers = config.providers;

        let response = gateway.complete(&request).await.map_err(|err| NodeError::new(classify(&err), err.to_string()))?;
        tracing::debug!(eid = %ctx.execution_id, nid = %ctx.node_id, provider = %response.provider, "completion served");

        Ok(NodeOutput::new(json!({
            "text": response.text,
            "data": response.data,
            "provider": response.provider,
            "model": response.model,
            "usage": response.usage,
            "attempts": response.attempts,
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        error::NodeErrorKind,
        gateway::{GatewayRouter, tests::MockProvider},
        nodes::tests::context,
    };

    fn router() -> Arc<GatewayRouter> {
        Arc::new(
            GatewayRouter::new(Duration::from_secs(1))
                .with_provider(MockProvider::failing("primary", NodeError::server("overloaded")))
                .with_provider(MockProvider::ok("backup", "done"))
                .with_default_chain(vec!["primary".to_string(), "backup".to_string()]),
        )
    }

    #[tokio::test]
    async fn test_completion_reports_fallback() {
        let ctx = context(Value::Null).with_gateway(Some(router()));
        let out = AiCompletionNode.execute(json!({ "prompt": "hello", "max_tokens": 16 }), ctx).await.unwrap();

        assert_eq!(out.value["text"], "done: hello");
        assert_eq!(out.value["provider"], "backup");
        assert_eq!(out.value["attempts"][0]["provider"], "primary");
        assert_eq!(out.value["usage"]["output_tokens"], 7);
    }

    #[tokio::test]
    async fn test_uniform_failures_keep_their_kind() {
        let ctx = context(Value::Null).with_gateway(Some(router()));
        let err = AiCompletionNode.execute(json!({ "prompt": "hi", "providers": ["primary"] }), ctx).await.unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::ServerError);
        assert!(err.message.contains("primary"));

        let err = AiCompletionNode.execute(json!({ "prompt": "hi" }), context(Value::Null)).await.unwrap_err();
        assert_eq!(err.kind, NodeErrorKind::ExecutionError);
    }
}
