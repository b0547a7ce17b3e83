mod collect;
mod r#impl;

use std::{collections::HashMap, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;

use crate::{
    Result,
    store::{DbCollection, DbStore, Store, data::*},
};
pub use collect::Collect;

#[derive(Debug, Clone)]
pub struct MemStore {
    workflows: Arc<Collect<Workflow>>,
    executions: Arc<Collect<Execution>>,
    logs: Arc<Collect<Log>>,
}

trait DbDocument: Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    /// Queryable fields of the record.
    fn doc(&self) -> Result<HashMap<String, JsonValue>>;
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DbStore for MemStore {
    fn init(
        &self,
        s: &Store,
    ) -> Result<()> {
        s.register(self.workflows())?;
        s.register(self.executions())?;
        s.register(self.logs())?;
        Ok(())
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            workflows: Arc::new(Collect::new("workflows")),
            executions: Arc::new(Collect::new("executions")),
            logs: Arc::new(Collect::new("logs")),
        }
    }

    pub fn workflows(&self) -> Arc<dyn DbCollection<Item = Workflow> + Send + Sync> {
        self.workflows.clone()
    }

    pub fn executions(&self) -> Arc<dyn DbCollection<Item = Execution> + Send + Sync> {
        self.executions.clone()
    }

    pub fn logs(&self) -> Arc<dyn DbCollection<Item = Log> + Send + Sync> {
        self.logs.clone()
    }
}
