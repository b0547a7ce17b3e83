use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde_json::Value;

use crate::{
    common::{MemCache, Vars},
    workflow::NodeId,
};

/// Current iteration of the innermost loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFrame {
    pub item: Value,
    pub index: usize,
}

/// Everything an expression can reference during one execution.
///
/// Clones share the execution-wide state (outputs, `previous`), while `$prev` and
/// the loop frame belong to the clone so each node sees its own input.
#[derive(Clone)]
pub struct VariableScope {
    execution_id: String,
    workflow_id: String,
    trigger: Arc<Value>,
    vars: Arc<Vars>,
    env: Arc<MemCache<String, String>>,
    outputs: Arc<MemCache<NodeId, Value>>,
    names: Arc<HashMap<String, NodeId>>,
    previous: Arc<RwLock<Value>>,
    prev: Value,
    loop_frame: Option<LoopFrame>,
}

impl VariableScope {
    pub fn new(
        execution_id: &str,
        workflow_id: &str,
        trigger: Value,
        vars: Vars,
        env: HashMap<String, String>,
        names: HashMap<String, NodeId>,
    ) -> Self {
        let env_cache = MemCache::new(env.len().max(16));
        for (k, v) in env {
            env_cache.set(k, v);
        }

        Self {
            execution_id: execution_id.to_string(),
            workflow_id: workflow_id.to_string(),
            trigger: Arc::new(trigger),
            vars: Arc::new(vars),
            env: Arc::new(env_cache),
            outputs: Arc::new(MemCache::new(names.len() * 2 + 64)),
            names: Arc::new(names),
            previous: Arc::new(RwLock::new(Value::Null)),
            prev: Value::Null,
            loop_frame: None,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn trigger(&self) -> &Value {
        &self.trigger
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// Workflow env first, then the process environment.
    pub fn env(
        &self,
        name: &str,
    ) -> Option<String> {
        self.env.get(&name.to_string()).or_else(|| std::env::var(name).ok())
    }

    /// Output of a node, looked up by id first and then by name.
    pub fn output(
        &self,
        id_or_name: &str,
    ) -> Option<Value> {
        if let Some(value) = self.outputs.get(&id_or_name.to_string()) {
            return Some(value);
        }
        self.names.get(id_or_name).and_then(|id| self.outputs.get(id))
    }

    pub fn set_output(
        &self,
        nid: &str,
        value: Value,
    ) {
        self.outputs.set(nid.to_string(), value.clone());
        if let Ok(mut previous) = self.previous.write() {
            *previous = value;
        }
    }

    /// Output of the most recently finished node in the execution.
    pub fn previous(&self) -> Value {
        self.previous.read().map(|v| v.clone()).unwrap_or(Value::Null)
    }

    /// Input of the node this scope was prepared for.
    pub fn prev(&self) -> &Value {
        &self.prev
    }

    pub fn with_prev(
        &self,
        prev: Value,
    ) -> Self {
        let mut scope = self.clone();
        scope.prev = prev;
        scope
    }

    pub fn with_loop(
        &self,
        item: Value,
        index: usize,
    ) -> Self {
        let mut scope = self.clone();
        scope.loop_frame = Some(LoopFrame {
            item,
            index,
        });
        scope
    }

    pub fn loop_frame(&self) -> Option<&LoopFrame> {
        self.loop_frame.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scope() -> VariableScope {
        let mut names = HashMap::new();
        names.insert("Fetch User".to_string(), "fetch".to_string());
        let mut env = HashMap::new();
        env.insert("NODEFLOW_TEST_REGION".to_string(), "eu".to_string());
        VariableScope::new("e1", "w1", json!({ "id": 7 }), Vars::new().with("limit", 3), env, names)
    }

    #[test]
    fn test_outputs_by_id_and_name() {
        let scope = scope();
        scope.set_output("fetch", json!({ "name": "ada" }));
        assert_eq!(scope.output("fetch"), Some(json!({ "name": "ada" })));
        assert_eq!(scope.output("Fetch User"), Some(json!({ "name": "ada" })));
        assert_eq!(scope.output("missing"), None);
        assert_eq!(scope.previous(), json!({ "name": "ada" }));
    }

    #[test]
    fn test_clones_share_outputs_not_prev() {
        let scope = scope();
        let child = scope.with_prev(json!(1)).with_loop(json!("a"), 0);
        child.set_output("fetch", json!(2));

        assert_eq!(scope.output("fetch"), Some(json!(2)));
        assert_eq!(scope.prev(), &Value::Null);
        assert!(scope.loop_frame().is_none());
        assert_eq!(child.loop_frame().map(|f| f.index), Some(0));
    }

    #[test]
    fn test_env_override() {
        let scope = scope();
        assert_eq!(scope.env("NODEFLOW_TEST_REGION").as_deref(), Some("eu"));
        assert_eq!(scope.env("NODEFLOW_TEST_SURELY_UNSET"), None);
    }
}
