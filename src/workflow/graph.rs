//! Runtime workflow representation using a directed graph.
//!
//! The graph is built once per execution from a validated [`WorkflowModel`] and is
//! read-only afterwards; execution state lives in the runtime context.

use std::collections::HashMap;

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};

use crate::{
    catalog::Catalog,
    error::{GraphError, GraphErrorKind},
    model::WorkflowModel,
    workflow::{
        edge::Edge,
        node::{Node, NodeId},
    },
};

/// Nodes bound to their kinds, connected by port-level edges.
pub struct WorkflowGraph {
    id: String,
    version: u32,
    graph: DiGraph<Node, Edge>,
    index: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    pub fn build(
        model: &WorkflowModel,
        catalog: &Catalog,
    ) -> Result<Self, GraphError> {
        let mut graph: DiGraph<Node, Edge> = DiGraph::new();
        let mut index = HashMap::new();

        for node in model.nodes.iter() {
            let node = Node::new(node, catalog)?;
            let nid = node.id.clone();
            if index.contains_key(&nid) {
                return Err(GraphError::at(GraphErrorKind::InvalidConfig, nid, "duplicate node id"));
            }
            let node_idx = graph.add_node(node);
            index.insert(nid, node_idx);
        }
        for conn in model.connections.iter() {
            let edge = Edge::from(conn);
            let source = index
                .get(&edge.source)
                .ok_or_else(|| GraphError::at(GraphErrorKind::DanglingReference, &edge.source, format!("source node of {} not found", edge)))?;
            let target = index
                .get(&edge.target)
                .ok_or_else(|| GraphError::at(GraphErrorKind::DanglingReference, &edge.target, format!("target node of {} not found", edge)))?;
            graph.add_edge(*source, *target, edge);
        }

        Ok(Self {
            id: model.id.clone(),
            version: model.version,
            graph,
            index,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// get node by id
    pub fn node(
        &self,
        id: &str,
    ) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// all nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes().map(|n| n.id.clone()).collect()
    }

    /// Declaration position of a node, used to order ready sets.
    pub fn position(
        &self,
        id: &str,
    ) -> usize {
        self.index.get(id).map(|idx| idx.index()).unwrap_or(usize::MAX)
    }

    /// every edge in declaration order
    pub fn edges(&self) -> Vec<Edge> {
        self.graph.edge_indices().map(|idx| self.graph[idx].clone()).collect()
    }

    /// incoming edges of a node, in declaration order
    pub fn incoming(
        &self,
        id: &str,
    ) -> Vec<&Edge> {
        self.directed(id, Direction::Incoming)
    }

    /// outgoing edges of a node, in declaration order
    pub fn outgoing(
        &self,
        id: &str,
    ) -> Vec<&Edge> {
        self.directed(id, Direction::Outgoing)
    }

    fn directed(
        &self,
        id: &str,
        dir: Direction,
    ) -> Vec<&Edge> {
        let Some(idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(*idx, dir).collect();
        edges.sort_by_key(|e| e.id().index());
        edges.into_iter().map(|e| e.weight()).collect()
    }

    /// ids of the trigger nodes
    pub fn triggers(&self) -> Vec<NodeId> {
        self.nodes().filter(|n| n.is_trigger()).map(|n| n.id.clone()).collect()
    }

    /// Display names mapped to node ids; the first node declared under a name wins.
    pub fn names(&self) -> HashMap<String, NodeId> {
        let mut names = HashMap::new();
        for node in self.nodes() {
            names.entry(node.name.clone()).or_insert_with(|| node.id.clone());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{ConnectionModel, NodeModel};

    #[test]
    fn test_build_keeps_declaration_order() {
        let model = WorkflowModel::new("wf", "orders")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("b", "log", json!({ "message": "b" })).named("Second"))
            .node(NodeModel::new("a", "log", json!({ "message": "a" })))
            .connect(ConnectionModel::new("start", "b"))
            .connect(ConnectionModel::new("start", "a"));
        let graph = WorkflowGraph::build(&model, &Catalog::builtin()).unwrap();

        assert_eq!(graph.node_ids(), vec!["start", "b", "a"]);
        assert_eq!(graph.outgoing("start").iter().map(|e| e.target.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(graph.triggers(), vec!["start"]);
        assert_eq!(graph.names().get("Second"), Some(&"b".to_string()));
        assert_eq!(graph.node("b").unwrap().name, "Second");
    }

    #[test]
    fn test_build_rejects_unknown_kind() {
        let model = WorkflowModel::new("wf", "bad").node(NodeModel::new("x", "teleport", json!({})));
        let err = WorkflowGraph::build(&model, &Catalog::builtin()).err().unwrap();
        assert_eq!(err.kind, GraphErrorKind::UnknownNodeType);
    }
}
