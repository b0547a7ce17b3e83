use crate::workflow::NodeId;

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Start(WorkflowStartEvent),
    Completed,
    PartialFailure,
    Failed(WorkflowFailedEvent),
    Cancelled,
}

impl WorkflowEvent {
    pub fn str(&self) -> &str {
        match self {
            WorkflowEvent::Start(_) => "Running",
            WorkflowEvent::Completed => "Completed",
            WorkflowEvent::PartialFailure => "PartialFailure",
            WorkflowEvent::Failed(_) => "Failed",
            WorkflowEvent::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowEvent::Start(_))
    }
}

/// Event emitted when an execution starts
#[derive(Debug, Clone)]
pub struct WorkflowStartEvent {
    /// All node IDs in the workflow for batch initialization
    pub node_ids: Vec<NodeId>,
    /// Topological layers of the main region
    pub layers: Vec<Vec<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct WorkflowFailedEvent {
    pub error: String,
}
