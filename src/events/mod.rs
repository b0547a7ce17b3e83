//! Event types for workflow execution.
//!
//! Events are emitted during execution to notify subscribers about node results,
//! terminal states and node log lines.

mod node;
mod workflow;

pub use node::*;
pub use workflow::*;

use serde::{Deserialize, Serialize};

use crate::workflow::NodeId;

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

/// Top-level event type for workflow graph events.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// Workflow-level events (start and terminal states).
    Workflow(WorkflowEvent),
    /// Node-level events (running, result).
    Node(NodeEvent),
}

/// Event message containing execution and node context.
#[derive(Debug, Clone)]
pub struct Message {
    /// Execution that generated this event.
    pub eid: String,
    /// Node that generated this event (empty for workflow events).
    pub nid: NodeId,
    /// The actual event data.
    pub event: GraphEvent,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Log line emitted by a node during execution.
#[derive(Debug, Clone)]
pub struct Log {
    pub eid: String,
    pub nid: NodeId,
    pub level: LogLevel,
    pub content: String,
    /// Timestamp in milliseconds of the log entry.
    pub timestamp: i64,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl GraphEvent {
    /// Finished without an unhandled failure.
    pub fn is_complete(&self) -> bool {
        matches!(self, GraphEvent::Workflow(WorkflowEvent::Completed | WorkflowEvent::PartialFailure))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GraphEvent::Workflow(WorkflowEvent::Failed(_)))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphEvent::Workflow(e) if e.is_terminal())
    }
}

impl Message {
    pub fn workflow(
        eid: &str,
        event: WorkflowEvent,
    ) -> Self {
        Self {
            eid: eid.to_string(),
            nid: NodeId::new(),
            event: GraphEvent::Workflow(event),
        }
    }

    pub fn node(
        eid: &str,
        nid: &str,
        event: NodeEvent,
    ) -> Self {
        Self {
            eid: eid.to_string(),
            nid: nid.to_string(),
            event: GraphEvent::Node(event),
        }
    }
}
