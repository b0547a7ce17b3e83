use std::{sync::Arc, time::Duration};

use serde_json::Value;

use crate::{
    catalog::{Catalog, Control, NodeDescriptor, NodeKind},
    error::{GraphError, GraphErrorKind},
    model::NodeModel,
    policy::ErrorPolicy,
};

/// node id
pub type NodeId = String;

/// A workflow step bound to its node kind.
#[derive(Clone)]
pub struct Node {
    /// node id
    pub id: NodeId,
    /// display name, defaults to the id
    pub name: String,
    /// catalog key
    pub uses: String,
    /// raw configuration, resolved right before each attempt
    pub config: Value,
    /// per-attempt timeout
    pub timeout: Option<Duration>,
    pub policy: ErrorPolicy,
    pub descriptor: NodeDescriptor,
    pub kind: Arc<dyn NodeKind>,
}

impl Node {
    pub fn new(
        model: &NodeModel,
        catalog: &Catalog,
    ) -> Result<Self, GraphError> {
        let kind = catalog
            .get(&model.uses)
            .ok_or_else(|| GraphError::at(GraphErrorKind::UnknownNodeType, &model.id, format!("unknown node type '{}'", model.uses)))?;

        let policy = match &model.error_policy {
            Some(value) => ErrorPolicy::from_value(value).map_err(|e| GraphError::at(GraphErrorKind::InvalidConfig, &model.id, e))?,
            None => ErrorPolicy::default(),
        };

        Ok(Self {
            id: model.id.clone(),
            name: model.display_name().to_string(),
            uses: model.uses.clone(),
            config: model.config.clone(),
            timeout: model.timeout.map(Duration::from_millis),
            policy,
            descriptor: kind.descriptor(),
            kind,
        })
    }

    pub fn control(&self) -> Control {
        self.descriptor.control
    }

    pub fn is_trigger(&self) -> bool {
        self.descriptor.is_trigger
    }
}

impl std::fmt::Debug for Node {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).field("name", &self.name).field("uses", &self.uses).finish()
    }
}
