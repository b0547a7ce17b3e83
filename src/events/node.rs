use crate::store::data::NodeResult;

#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A node attempt started; carries the attempt number (0 for the first).
    Running(u32),
    /// One entry appended to the execution's results.
    Result(NodeResult),
}

impl NodeEvent {
    pub fn str(&self) -> &str {
        match self {
            NodeEvent::Running(_) => "Running",
            NodeEvent::Result(_) => "Result",
        }
    }
}
