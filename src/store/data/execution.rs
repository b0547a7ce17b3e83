use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::NodeError,
    store::{DbCollectionIden, StoreIden},
    utils,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    PartialFailure,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::PartialFailure | ExecutionStatus::Failed | ExecutionStatus::Cancelled)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
    Retried,
}

/// Outcome of one node attempt, appended to the execution in order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub node_id: String,
    pub node_name: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub output: Value,
    pub duration_ms: u64,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Loop index when produced inside a loop body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    pub timestamp: i64,
}

impl NodeResult {
    pub fn new(
        node_id: &str,
        node_name: &str,
        status: NodeStatus,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            status,
            output: Value::Null,
            duration_ms: 0,
            retry_count: 0,
            error: None,
            reason: None,
            iteration: None,
            timestamp: utils::time::time_millis(),
        }
    }

    pub fn skipped(
        node_id: &str,
        node_name: &str,
        reason: &str,
    ) -> Self {
        let mut result = Self::new(node_id, node_name, NodeStatus::Skipped);
        result.reason = Some(reason.to_string());
        result
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Execution {
    pub id: String,
    pub wid: String,
    pub workflow_version: u32,
    #[serde(default)]
    pub trigger: Value,
    pub status: ExecutionStatus,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default)]
    pub results: Vec<NodeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl Execution {
    /// Results recorded for one node, in order.
    pub fn results_of(
        &self,
        nid: &str,
    ) -> Vec<&NodeResult> {
        self.results.iter().filter(|r| r.node_id == nid).collect()
    }

    /// The last result recorded for a node.
    pub fn last_result(
        &self,
        nid: &str,
    ) -> Option<&NodeResult> {
        self.results.iter().rev().find(|r| r.node_id == nid)
    }
}

impl DbCollectionIden for Execution {
    fn iden() -> StoreIden {
        StoreIden::Executions
    }
}
