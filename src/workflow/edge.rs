//! Runtime edges between node ports.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    model::{ConnectionModel, ERROR_PORT},
    nodes::{LOOP_BACK_PORT, LOOP_BODY_PORT},
    workflow::node::NodeId,
};

/// A data-flow connection from one node's output port to another's input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: NodeId,
    pub source_port: String,
    pub target: NodeId,
    pub target_port: String,
}

impl Edge {
    pub fn is_error(&self) -> bool {
        self.source_port == ERROR_PORT
    }

    /// Whether the edge closes an iteration of the loop it points at.
    pub fn is_loop_back(&self) -> bool {
        self.target_port == LOOP_BACK_PORT
    }
}

impl From<&ConnectionModel> for Edge {
    fn from(conn: &ConnectionModel) -> Self {
        Self {
            source: conn.source.clone(),
            source_port: conn.source_port.clone(),
            target: conn.target.clone(),
            target_port: conn.target_port.clone(),
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}.{} -> {}.{}", self.source, self.source_port, self.target, self.target_port)
    }
}

/// Nodes reachable from a loop's `body` port without passing back through the loop.
pub(crate) fn loop_body(
    loop_id: &str,
    edges: &[Edge],
) -> HashSet<NodeId> {
    let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in edges {
        outgoing.entry(edge.source.as_str()).or_default().push(edge);
    }

    let mut body = HashSet::new();
    let mut queue: VecDeque<&str> = outgoing
        .get(loop_id)
        .into_iter()
        .flatten()
        .filter(|e| e.source_port == LOOP_BODY_PORT && e.target != loop_id)
        .map(|e| e.target.as_str())
        .collect();

    while let Some(nid) = queue.pop_front() {
        if !body.insert(nid.to_string()) {
            continue;
        }
        for edge in outgoing.get(nid).into_iter().flatten() {
            if edge.target != loop_id && !body.contains(&edge.target) {
                queue.push_back(&edge.target);
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Edge {
        Edge::from(&ConnectionModel::new(source, target).from_port(source_port).to_port(target_port))
    }

    #[test]
    fn test_loop_body_stops_at_the_loop() {
        let edges = vec![
            edge("each", "body", "a", "main"),
            edge("a", "main", "b", "main"),
            edge("b", "main", "each", "loop"),
            edge("each", "main", "after", "main"),
        ];
        let body = loop_body("each", &edges);
        assert_eq!(body, HashSet::from(["a".to_string(), "b".to_string()]));
        assert!(edges[2].is_loop_back());
        assert!(!edges[3].is_error());
    }
}
