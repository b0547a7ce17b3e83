use std::{
    any::Any,
    collections::HashMap,
    convert::AsRef,
    sync::{Arc, RwLock},
};

use tracing::trace;

use crate::{NodeflowError, Result, ShareLock, model::WorkflowModel, utils};

use super::{DbCollection, DbCollectionIden, StoreIden, data::*, map_db_err};

#[derive(Clone)]
pub struct DynDbSetRef<T>(Arc<dyn DbCollection<Item = T>>);

pub struct Store {
    collections: ShareLock<HashMap<StoreIden, Arc<dyn Any + Send + Sync + 'static>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn collection<DATA>(&self) -> Result<Arc<dyn DbCollection<Item = DATA>>>
    where
        DATA: DbCollectionIden + Send + Sync + 'static,
    {
        let collections = self.collections.read().map_err(map_db_err)?;
        collections
            .get(&DATA::iden())
            .and_then(|c| c.downcast_ref::<DynDbSetRef<DATA>>())
            .map(|v| v.0.clone())
            .ok_or_else(|| NodeflowError::Store(format!("fail to get collection: {}", DATA::iden().as_ref())))
    }

    pub fn register<DATA>(
        &self,
        collection: Arc<dyn DbCollection<Item = DATA> + Send + Sync + 'static>,
    ) -> Result<()>
    where
        DATA: DbCollectionIden + 'static,
    {
        let mut collections = self.collections.write().map_err(map_db_err)?;
        collections.insert(DATA::iden(), Arc::new(DynDbSetRef::<DATA>(collection)));
        Ok(())
    }

    pub fn workflows(&self) -> Result<Arc<dyn DbCollection<Item = Workflow>>> {
        self.collection()
    }

    pub fn executions(&self) -> Result<Arc<dyn DbCollection<Item = Execution>>> {
        self.collection()
    }

    pub fn logs(&self) -> Result<Arc<dyn DbCollection<Item = Log>>> {
        self.collection()
    }

    /// Save or replace a workflow definition.
    pub fn deploy(
        &self,
        workflow: &WorkflowModel,
    ) -> Result<bool> {
        trace!("store::deploy({})", workflow.id);
        if workflow.id.is_empty() {
            return Err(NodeflowError::Store("missing id in workflow".into()));
        }
        let workflows = self.workflows()?;
        let text = workflow.to_json()?;
        match workflows.find(&workflow.id) {
            Ok(m) => {
                let data = Workflow {
                    id: workflow.id.clone(),
                    name: workflow.name.clone(),
                    desc: workflow.desc.clone(),
                    version: workflow.version,
                    data: text,
                    create_time: m.create_time,
                    update_time: utils::time::time_millis(),
                };
                workflows.update(&data)
            }
            Err(_) => {
                let data = Workflow {
                    id: workflow.id.clone(),
                    name: workflow.name.clone(),
                    desc: workflow.desc.clone(),
                    version: workflow.version,
                    data: text,
                    create_time: utils::time::time_millis(),
                    update_time: 0,
                };
                workflows.create(&data)
            }
        }
    }

    /// Load a deployed definition back into a model.
    pub fn load_workflow(
        &self,
        wid: &str,
    ) -> Result<WorkflowModel> {
        let workflow = self.workflows()?.find(wid)?;
        WorkflowModel::from_json(&workflow.data)
    }
}
