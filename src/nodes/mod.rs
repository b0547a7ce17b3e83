//! Built-in node kinds.

mod ai_completion;
mod http_request;
mod if_else;
mod log;
mod r#loop;
mod merge;
mod parallel;
mod set;
mod trigger;
mod wait;

use std::sync::Arc;

pub use ai_completion::AiCompletionNode;
pub use http_request::HttpRequestNode;
pub use if_else::IfElseNode;
pub use log::LogNode;
pub use r#loop::{LOOP_BACK_PORT, LOOP_BODY_PORT, LoopNode};
pub use merge::{MergeMode, MergeNode};
pub use parallel::ParallelNode;
pub use set::SetNode;
pub use trigger::TriggerNode;
pub use wait::WaitNode;

use crate::catalog::Catalog;

pub(crate) fn register_builtin(catalog: &mut Catalog) {
    catalog.register(Arc::new(TriggerNode));
    catalog.register(Arc::new(LogNode));
    catalog.register(Arc::new(SetNode));
    catalog.register(Arc::new(IfElseNode));
    catalog.register(Arc::new(HttpRequestNode));
    catalog.register(Arc::new(ParallelNode));
    catalog.register(Arc::new(MergeNode));
    catalog.register(Arc::new(LoopNode));
    catalog.register(Arc::new(WaitNode));
    catalog.register(Arc::new(AiCompletionNode));
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use serde_json::Value;

    use crate::{catalog::NodeContext, common::Vars, runtime::VariableScope};

    /// Context for a node running alone with `prev` as its input.
    pub(crate) fn context(prev: Value) -> NodeContext {
        let scope = VariableScope::new("exec-test", "wf-test", Value::Null, Vars::new(), HashMap::new(), HashMap::new());
        NodeContext::new("node", "Node", scope.with_prev(prev))
    }
}
