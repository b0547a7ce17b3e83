use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// A step as stored in a workflow definition.
///
/// `config` values are literals or `{{ ... }}` expression strings; they are
/// resolved against the execution scope right before the node runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Catalog key of the node kind.
    pub uses: String,
    #[serde(default = "empty_object")]
    pub config: Value,
    /// Per-attempt timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_policy: Option<Value>,
}

fn empty_object() -> Value {
    json!({})
}

impl NodeModel {
    pub fn new(
        id: &str,
        uses: &str,
        config: Value,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            uses: uses.to_string(),
            config,
            timeout: None,
            error_policy: None,
        }
    }

    pub fn named(
        mut self,
        name: &str,
    ) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_policy(
        mut self,
        policy: Value,
    ) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn with_timeout(
        mut self,
        timeout_ms: u64,
    ) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}
