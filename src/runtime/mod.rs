mod channel;
mod context;
mod execution;
mod scope;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use context::{Context, ExecutionOptions};
pub use execution::ExecutionHandle;
pub use scope::{LoopFrame, VariableScope};
