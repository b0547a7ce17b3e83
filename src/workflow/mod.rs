//! Workflow graph model, validation and execution planning.

pub mod edge;
pub mod graph;
pub mod node;
pub mod plan;
pub mod validate;

pub use edge::Edge;
pub use graph::WorkflowGraph;
pub use node::{Node, NodeId};
pub use plan::ExecutionPlan;
pub use validate::{ValidationResult, validate};
