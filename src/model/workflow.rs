use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    NodeflowError, Result,
    model::{ConnectionModel, NodeModel},
};

/// A persisted workflow definition: the full graph plus workflow-scoped data.
///
/// The engine only reads definitions; editors own their mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default = "first_version")]
    pub version: u32,
    /// Environment overrides, consulted before the process environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Workflow-scoped variables, available as `$vars`.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub connections: Vec<ConnectionModel>,
}

fn first_version() -> u32 {
    1
}

impl WorkflowModel {
    pub fn new(
        id: &str,
        name: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: first_version(),
            ..Default::default()
        }
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<WorkflowModel>(s).map_err(|e| NodeflowError::Convert(format!("invalid workflow definition: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn node(
        mut self,
        node: NodeModel,
    ) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn connect(
        mut self,
        connection: ConnectionModel,
    ) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn variable(
        mut self,
        key: &str,
        value: Value,
    ) -> Self {
        self.variables.insert(key.to_string(), value);
        self
    }

    pub fn find_node(
        &self,
        id: &str,
    ) -> Option<&NodeModel> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let text = r#"{
            "id": "wf",
            "nodes": [
                { "id": "start", "uses": "trigger" },
                { "id": "say", "name": "Say", "uses": "log", "config": { "message": "hello" } }
            ],
            "connections": [ { "source": "start", "target": "say" } ]
        }"#;
        let model = WorkflowModel::from_json(text).unwrap();
        assert_eq!(model.version, 1);
        assert_eq!(model.connections[0].source_port, "main");
        assert_eq!(model.connections[0].target_port, "main");
        assert_eq!(model.nodes[0].config, json!({}));
        assert_eq!(model.nodes[0].display_name(), "start");
        assert_eq!(model.find_node("say").unwrap().display_name(), "Say");
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = WorkflowModel::from_json("{ nope").unwrap_err();
        assert!(matches!(err, NodeflowError::Convert(_)));
    }

    #[test]
    fn test_json_roundtrip_is_lossless() {
        let model = WorkflowModel::new("wf", "Roundtrip")
            .variable("region", json!("eu"))
            .node(NodeModel::new("t", "trigger", json!({})))
            .node(NodeModel::new("a", "log", json!({ "message": "{{ $vars.region }}" })).with_timeout(500))
            .connect(ConnectionModel::new("t", "a"));
        let back = WorkflowModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(back, model);
    }
}
