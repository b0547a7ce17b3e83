//! Topological layering and loop regions.

use std::collections::{HashMap, HashSet};

use petgraph::{algo::toposort, graph::DiGraph};

use crate::{
    catalog::Control,
    error::{GraphError, GraphErrorKind},
    nodes::LOOP_BODY_PORT,
    workflow::{
        edge::{Edge, loop_body},
        graph::WorkflowGraph,
        node::NodeId,
    },
};

/// Index into [`ExecutionPlan::edge`].
pub type EdgeIdx = usize;

/// Static scheduling facts derived once per execution.
///
/// The main region holds every node outside a loop body; each loop owns the
/// nodes reachable from its `body` port, with the innermost loop winning.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    edges: Vec<Edge>,
    incoming: HashMap<NodeId, Vec<EdgeIdx>>,
    outgoing: HashMap<NodeId, Vec<EdgeIdx>>,
    back_edges: HashSet<EdgeIdx>,
    depth: HashMap<NodeId, usize>,
    /// innermost loop owning each node, `None` for the main region
    owner: HashMap<NodeId, Option<NodeId>>,
    /// region members in dispatch order
    regions: HashMap<Option<NodeId>, Vec<NodeId>>,
}

impl ExecutionPlan {
    pub fn build(graph: &WorkflowGraph) -> Result<Self, GraphError> {
        let edges = graph.edges();
        let ids = graph.node_ids();

        let mut incoming: HashMap<NodeId, Vec<EdgeIdx>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<EdgeIdx>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            incoming.entry(edge.target.clone()).or_default().push(i);
            outgoing.entry(edge.source.clone()).or_default().push(i);
        }

        let mut bodies: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        for node in graph.nodes().filter(|n| n.control() == Control::Loop) {
            bodies.insert(node.id.clone(), loop_body(&node.id, &edges));
        }

        let back_edges: HashSet<EdgeIdx> = edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_loop_back() && bodies.get(&e.target).is_some_and(|body| body.contains(&e.source)))
            .map(|(i, _)| i)
            .collect();

        // depth grouping over the acyclic graph
        let mut dag: DiGraph<NodeId, ()> = DiGraph::new();
        let index: HashMap<&NodeId, _> = ids.iter().map(|id| (id, dag.add_node(id.clone()))).collect();
        for (i, edge) in edges.iter().enumerate() {
            if !back_edges.contains(&i) {
                dag.add_edge(index[&edge.source], index[&edge.target], ());
            }
        }
        let order = toposort(&dag, None).map_err(|cycle| GraphError::at(GraphErrorKind::Cycle, &dag[cycle.node_id()], "cycle detected through node"))?;

        let mut depth: HashMap<NodeId, usize> = HashMap::new();
        for idx in order {
            let nid = &dag[idx];
            let d = incoming
                .get(nid)
                .into_iter()
                .flatten()
                .filter(|i| !back_edges.contains(*i))
                .map(|i| depth.get(&edges[*i].source).map_or(0, |d| d + 1))
                .max()
                .unwrap_or(0);
            depth.insert(nid.clone(), d);
        }

        let mut owner: HashMap<NodeId, Option<NodeId>> = HashMap::new();
        for id in &ids {
            let innermost = bodies.iter().filter(|(_, body)| body.contains(id)).min_by_key(|(_, body)| body.len()).map(|(lid, _)| lid.clone());
            owner.insert(id.clone(), innermost);
        }

        let mut regions: HashMap<Option<NodeId>, Vec<NodeId>> = HashMap::new();
        let mut sorted = ids.clone();
        sorted.sort_by_key(|id| (depth[id], graph.position(id)));
        for id in sorted {
            regions.entry(owner[&id].clone()).or_default().push(id);
        }

        Ok(Self {
            edges,
            incoming,
            outgoing,
            back_edges,
            depth,
            owner,
            regions,
        })
    }

    pub fn edge(
        &self,
        idx: EdgeIdx,
    ) -> &Edge {
        &self.edges[idx]
    }

    pub fn incoming(
        &self,
        nid: &str,
    ) -> &[EdgeIdx] {
        self.incoming.get(nid).map_or(&[], |v| v.as_slice())
    }

    pub fn outgoing(
        &self,
        nid: &str,
    ) -> &[EdgeIdx] {
        self.outgoing.get(nid).map_or(&[], |v| v.as_slice())
    }

    pub fn is_back_edge(
        &self,
        idx: EdgeIdx,
    ) -> bool {
        self.back_edges.contains(&idx)
    }

    pub fn depth(
        &self,
        nid: &str,
    ) -> usize {
        self.depth.get(nid).copied().unwrap_or(0)
    }

    /// Loop owning the node, `None` for the main region.
    pub fn owner(
        &self,
        nid: &str,
    ) -> Option<&str> {
        self.owner.get(nid).and_then(|o| o.as_deref())
    }

    /// Members of a region in dispatch order.
    pub fn region(
        &self,
        owner: Option<&str>,
    ) -> &[NodeId] {
        self.regions.get(&owner.map(str::to_string)).map_or(&[], |v| v.as_slice())
    }

    /// Ready sets of the main region.
    pub fn layers(&self) -> Vec<Vec<NodeId>> {
        let mut layers: Vec<Vec<NodeId>> = Vec::new();
        for nid in self.region(None) {
            let d = self.depth(nid);
            if layers.len() <= d {
                layers.resize(d + 1, Vec::new());
            }
            layers[d].push(nid.clone());
        }
        layers.retain(|l| !l.is_empty());
        layers
    }

    /// Incoming edges a node waits on inside its own region.
    pub fn region_inputs(
        &self,
        nid: &str,
    ) -> Vec<EdgeIdx> {
        let owner = self.owner(nid);
        self.incoming(nid)
            .iter()
            .copied()
            .filter(|i| !self.is_back_edge(*i))
            .filter(|i| {
                let edge = &self.edges[*i];
                self.owner(&edge.source) == owner || (Some(edge.source.as_str()) == owner && edge.source_port == LOOP_BODY_PORT)
            })
            .collect()
    }

    /// Edges from a loop into its body region.
    pub fn body_entries(
        &self,
        loop_id: &str,
    ) -> Vec<EdgeIdx> {
        self.outgoing(loop_id)
            .iter()
            .copied()
            .filter(|i| {
                let edge = &self.edges[*i];
                edge.source_port == LOOP_BODY_PORT && self.owner(&edge.target) == Some(loop_id)
            })
            .collect()
    }

    /// Nodes whose output makes up one iteration's result: the sources of the
    /// loop's back-edges, or the body's sinks when nothing is wired back.
    pub fn iteration_outputs(
        &self,
        loop_id: &str,
    ) -> Vec<NodeId> {
        let backs: Vec<NodeId> = self.incoming(loop_id).iter().filter(|i| self.is_back_edge(**i)).map(|i| self.edges[*i].source.clone()).collect();
        if !backs.is_empty() {
            return backs;
        }
        self.region(Some(loop_id))
            .iter()
            .filter(|nid| !self.outgoing(nid).iter().any(|i| self.owner(&self.edges[*i].target) == Some(loop_id)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        catalog::Catalog,
        model::{ConnectionModel, NodeModel, WorkflowModel},
    };

    fn plan(model: &WorkflowModel) -> ExecutionPlan {
        ExecutionPlan::build(&WorkflowGraph::build(model, &Catalog::builtin()).unwrap()).unwrap()
    }

    fn log(id: &str) -> NodeModel {
        NodeModel::new(id, "log", json!({ "message": id }))
    }

    #[test]
    fn test_layers_group_by_depth() {
        let model = WorkflowModel::new("wf", "fan")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("fan", "parallel", json!({})))
            .node(log("a"))
            .node(log("b"))
            .node(NodeModel::new("join", "merge", json!({})))
            .connect(ConnectionModel::new("start", "fan"))
            .connect(ConnectionModel::new("fan", "b"))
            .connect(ConnectionModel::new("fan", "a"))
            .connect(ConnectionModel::new("a", "join"))
            .connect(ConnectionModel::new("b", "join"))
            .connect(ConnectionModel::new("start", "join"));
        let plan = plan(&model);

        assert_eq!(plan.layers(), vec![vec!["start"], vec!["fan"], vec!["a", "b"], vec!["join"]]);
        assert_eq!(plan.region_inputs("join").len(), 3);
    }

    #[test]
    fn test_nested_loops_get_innermost_regions() {
        let model = WorkflowModel::new("wf", "nested")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("outer", "loop", json!({ "items": [1, 2] })))
            .node(NodeModel::new("inner", "loop", json!({ "items": [3] })))
            .node(log("work"))
            .node(log("tail"))
            .node(log("after"))
            .connect(ConnectionModel::new("start", "outer"))
            .connect(ConnectionModel::new("outer", "inner").from_port("body"))
            .connect(ConnectionModel::new("inner", "work").from_port("body"))
            .connect(ConnectionModel::new("work", "inner").to_port("loop"))
            .connect(ConnectionModel::new("inner", "tail"))
            .connect(ConnectionModel::new("tail", "outer").to_port("loop"))
            .connect(ConnectionModel::new("outer", "after"));
        let plan = plan(&model);

        assert_eq!(plan.region(None), ["start", "outer", "after"]);
        assert_eq!(plan.region(Some("outer")), ["inner", "tail"]);
        assert_eq!(plan.region(Some("inner")), ["work"]);
        assert_eq!(plan.owner("work"), Some("inner"));
        assert_eq!(plan.body_entries("outer").len(), 1);
        assert_eq!(plan.iteration_outputs("outer"), vec!["tail"]);
        assert_eq!(plan.iteration_outputs("inner"), vec!["work"]);
        assert_eq!(plan.region_inputs("inner").len(), 1);
        assert_eq!(plan.region_inputs("tail").len(), 1);
    }

    #[test]
    fn test_body_sinks_are_iteration_outputs_without_back_edges() {
        let model = WorkflowModel::new("wf", "sinks")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("each", "loop", json!({ "items": [1] })))
            .node(log("a"))
            .node(log("b"))
            .connect(ConnectionModel::new("start", "each"))
            .connect(ConnectionModel::new("each", "a").from_port("body"))
            .connect(ConnectionModel::new("a", "b"));
        assert_eq!(plan(&model).iteration_outputs("each"), vec!["b"]);
    }
}
