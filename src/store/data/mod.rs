mod execution;
mod log;
mod workflow;

pub use execution::{Execution, ExecutionStatus, NodeResult, NodeStatus};
pub use log::Log;
pub use workflow::Workflow;
