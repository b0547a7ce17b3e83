//! The node type catalog: an explicit registry of node kinds keyed by type string.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    error::NodeError,
    events::{Log, LogLevel},
    expression,
    gateway::GatewayRouter,
    model::{ERROR_PORT, MAIN_PORT},
    nodes,
    runtime::{Channel, VariableScope},
    store::data::NodeStatus,
    utils,
    workflow::NodeId,
};

/// How the scheduler treats a node beyond running it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Control {
    #[default]
    Task,
    /// Fans out to every successor concurrently.
    Parallel,
    /// Barrier over its incoming edges.
    Merge,
    /// Runs its `body` region once per item.
    Loop,
}

/// Static facts about a node kind.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    pub kind: String,
    pub is_trigger: bool,
    pub control: Control,
    pub input_ports: Vec<String>,
    /// `*` accepts any port name. `error` is always accepted.
    pub output_ports: Vec<String>,
}

impl NodeDescriptor {
    pub fn task(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            is_trigger: false,
            control: Control::Task,
            input_ports: vec![MAIN_PORT.to_string()],
            output_ports: vec![MAIN_PORT.to_string()],
        }
    }

    pub fn trigger(kind: &str) -> Self {
        Self {
            is_trigger: true,
            input_ports: Vec::new(),
            ..Self::task(kind)
        }
    }

    pub fn with_control(
        mut self,
        control: Control,
    ) -> Self {
        self.control = control;
        self
    }

    pub fn with_inputs(
        mut self,
        ports: &[&str],
    ) -> Self {
        self.input_ports = ports.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_outputs(
        mut self,
        ports: &[&str],
    ) -> Self {
        self.output_ports = ports.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn accepts_output(
        &self,
        port: &str,
    ) -> bool {
        port == ERROR_PORT || self.output_ports.iter().any(|p| p == "*" || p == port)
    }

    pub fn accepts_input(
        &self,
        port: &str,
    ) -> bool {
        self.input_ports.iter().any(|p| p == "*" || p == port)
    }
}

/// What a node hands back to the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub value: Value,
    /// Only edges leaving this port are taken; `None` takes every port except `error`.
    pub port: Option<String>,
    /// Hold the branch for this long after the node finished, without a concurrency slot.
    pub delay: Option<Duration>,
}

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            port: None,
            delay: None,
        }
    }

    pub fn on_port(
        mut self,
        port: &str,
    ) -> Self {
        self.port = Some(port.to_string());
        self
    }

    pub fn with_delay(
        mut self,
        delay: Duration,
    ) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One incoming edge as seen by the node, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInput {
    pub source: NodeId,
    pub port: String,
    pub status: NodeStatus,
    pub value: Value,
}

/// Runtime facilities available to a node while it executes.
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub node_id: NodeId,
    pub node_name: String,
    /// Retries already performed for this node.
    pub attempt: u32,
    pub inputs: Vec<NodeInput>,
    pub scope: VariableScope,
    /// Loop bound used when a loop node does not set its own.
    pub loop_max_iterations: usize,
    channel: Option<Arc<Channel>>,
    gateway: Option<Arc<GatewayRouter>>,
}

impl NodeContext {
    pub fn new(
        node_id: &str,
        node_name: &str,
        scope: VariableScope,
    ) -> Self {
        Self {
            execution_id: scope.execution_id().to_string(),
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            attempt: 0,
            inputs: Vec::new(),
            scope,
            loop_max_iterations: 1000,
            channel: None,
            gateway: None,
        }
    }

    pub fn with_inputs(
        mut self,
        inputs: Vec<NodeInput>,
    ) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_gateway(
        mut self,
        gateway: Option<Arc<GatewayRouter>>,
    ) -> Self {
        self.gateway = gateway;
        self
    }

    pub(crate) fn with_channel(
        mut self,
        channel: Arc<Channel>,
    ) -> Self {
        self.channel = Some(channel);
        self
    }

    /// The node's `$prev` value.
    pub fn input(&self) -> &Value {
        self.scope.prev()
    }

    pub fn gateway(&self) -> Option<&Arc<GatewayRouter>> {
        self.gateway.as_ref()
    }

    /// Publish a log line for this node on the engine's log queue.
    pub fn emit_log(
        &self,
        level: LogLevel,
        content: impl Into<String>,
    ) {
        if let Some(channel) = &self.channel {
            channel.emit_log(Log {
                eid: self.execution_id.clone(),
                nid: self.node_id.clone(),
                level,
                content: content.into(),
                timestamp: utils::time::time_millis(),
            });
        }
    }
}

/// The contract every node kind implements.
#[async_trait]
pub trait NodeKind: Send + Sync {
    fn descriptor(&self) -> NodeDescriptor;

    /// JSON schema of the node's configuration.
    fn schema(&self) -> Value {
        json!({ "type": "object" })
    }

    /// Check raw (unresolved) configuration against [`NodeKind::schema`].
    ///
    /// Fields holding `{{ ... }}` expressions are only typed after resolution, so
    /// their schema constraints are not enforced here.
    fn validate_config(
        &self,
        config: &Value,
    ) -> Result<(), String> {
        let schema = relax_schema(&self.schema(), config);
        let validator = jsonschema::validator_for(&schema).map_err(|e| format!("invalid schema for '{}': {}", self.descriptor().kind, e))?;
        let errors: Vec<String> = validator.iter_errors(config).map(|e| e.to_string()).collect();
        if errors.is_empty() { Ok(()) } else { Err(errors.join("; ")) }
    }

    /// Run the node with its resolved configuration.
    async fn execute(
        &self,
        config: Value,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError>;
}

/// Copy of `schema` where properties whose value in `config` is an expression accept anything.
pub fn relax_schema(
    schema: &Value,
    config: &Value,
) -> Value {
    let mut schema = schema.clone();
    match config {
        Value::Object(fields) => {
            if let Some(Value::Object(props)) = schema.get_mut("properties") {
                for (key, value) in fields {
                    if let Some(prop) = props.get_mut(key) {
                        *prop = match value {
                            Value::String(s) if expression::is_expression(s) => json!({}),
                            _ => relax_schema(prop, value),
                        };
                    }
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items").cloned() {
                let relaxed = items.iter().fold(item_schema, |s, item| relax_schema(&s, item));
                schema["items"] = relaxed;
            }
        }
        _ => {}
    }
    schema
}

/// Registry of node kinds.
#[derive(Clone, Default)]
pub struct Catalog {
    kinds: HashMap<String, Arc<dyn NodeKind>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in kind registered.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        nodes::register_builtin(&mut catalog);
        catalog
    }

    pub fn register(
        &mut self,
        kind: Arc<dyn NodeKind>,
    ) {
        self.kinds.insert(kind.descriptor().kind, kind);
    }

    pub fn with(
        mut self,
        kind: Arc<dyn NodeKind>,
    ) -> Self {
        self.register(kind);
        self
    }

    pub fn get(
        &self,
        kind: &str,
    ) -> Option<Arc<dyn NodeKind>> {
        self.kinds.get(kind).cloned()
    }

    pub fn contains(
        &self,
        kind: &str,
    ) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered type strings, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.kinds.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.kinds(), vec!["ai_completion", "http_request", "if_else", "log", "loop", "merge", "parallel", "set", "trigger", "wait"]);
        assert!(catalog.get("trigger").unwrap().descriptor().is_trigger);
        assert_eq!(catalog.get("merge").unwrap().descriptor().control, Control::Merge);
    }

    #[test]
    fn test_descriptor_ports() {
        let d = NodeDescriptor::task("x").with_outputs(&["*"]);
        assert!(d.accepts_output("anything"));
        let d = NodeDescriptor::task("x");
        assert!(d.accepts_output("main"));
        assert!(d.accepts_output("error"));
        assert!(!d.accepts_output("body"));
        assert!(!NodeDescriptor::trigger("t").accepts_input("main"));
    }

    #[test]
    fn test_relax_schema_for_expressions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": { "type": "integer" },
                "nested": { "type": "object", "properties": { "flag": { "type": "boolean" } } },
                "rows": { "type": "array", "items": { "type": "object", "properties": { "n": { "type": "number" } } } }
            },
            "additionalProperties": false
        });
        let config = json!({ "count": "{{ $trigger.n }}", "nested": { "flag": "{{ $vars.on }}" }, "rows": [{ "n": 1 }, { "n": "{{ $prev }}" }] });
        let relaxed = relax_schema(&schema, &config);
        assert_eq!(relaxed["properties"]["count"], json!({}));
        assert_eq!(relaxed["properties"]["nested"]["properties"]["flag"], json!({}));
        assert_eq!(relaxed["properties"]["rows"]["items"]["properties"]["n"], json!({}));
        assert_eq!(relaxed["additionalProperties"], json!(false));
    }

    #[test]
    fn test_validate_config() {
        let wait = Catalog::builtin().get("wait").unwrap();
        assert!(wait.validate_config(&json!({ "duration_ms": 10 })).is_ok());
        assert!(wait.validate_config(&json!({ "duration_ms": "{{ $trigger.delay }}" })).is_ok());
        assert!(wait.validate_config(&json!({ "duration_ms": "soon" })).is_err());
        assert!(wait.validate_config(&json!({})).is_err());
    }
}
