mod connection;
mod node;
mod workflow;

pub use connection::ConnectionModel;
pub use node::NodeModel;
pub use workflow::WorkflowModel;

/// Default output and input port name.
pub const MAIN_PORT: &str = "main";
/// Output port leading to error-handler nodes.
pub const ERROR_PORT: &str = "error";
