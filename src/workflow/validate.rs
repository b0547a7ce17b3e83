//! Structural validation of workflow definitions.
//!
//! Every problem is collected instead of stopping at the first one, and errors are
//! ordered by the declaration of the node they are attached to, so validating the
//! same definition always yields the same result.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    catalog::{Catalog, Control, NodeDescriptor},
    error::{GraphError, GraphErrorKind},
    expression,
    model::{ERROR_PORT, NodeModel, WorkflowModel},
    nodes::LOOP_BODY_PORT,
    policy::ErrorPolicy,
    workflow::edge::{Edge, loop_body},
};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub errors: Vec<GraphError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The first error, if any.
    pub fn into_result(self) -> Result<(), GraphError> {
        match self.errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Check a definition against the catalog without modifying it.
pub fn validate(
    model: &WorkflowModel,
    catalog: &Catalog,
) -> ValidationResult {
    let mut validator = Validator::new(model, catalog);
    validator.check_nodes();
    validator.check_connections();
    validator.check_loops();
    validator.check_cycles();
    validator.check_triggers();
    validator.check_merges();
    validator.check_branches();
    validator.finish()
}

struct Validator<'a> {
    model: &'a WorkflowModel,
    catalog: &'a Catalog,
    positions: HashMap<&'a str, usize>,
    descriptors: HashMap<&'a str, NodeDescriptor>,
    policies: HashMap<&'a str, ErrorPolicy>,
    /// Connections whose endpoints both exist.
    edges: Vec<Edge>,
    back_edges: HashSet<Edge>,
    errors: Vec<GraphError>,
}

impl<'a> Validator<'a> {
    fn new(
        model: &'a WorkflowModel,
        catalog: &'a Catalog,
    ) -> Self {
        let mut positions = HashMap::new();
        for (i, node) in model.nodes.iter().enumerate() {
            positions.entry(node.id.as_str()).or_insert(i);
        }
        Self {
            model,
            catalog,
            positions,
            descriptors: HashMap::new(),
            policies: HashMap::new(),
            edges: Vec::new(),
            back_edges: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn error(
        &mut self,
        kind: GraphErrorKind,
        node: &str,
        message: impl Into<String>,
    ) {
        self.errors.push(GraphError::at(kind, node, message));
    }

    fn check_nodes(&mut self) {
        let mut seen = HashSet::new();
        for node in &self.model.nodes {
            if !seen.insert(node.id.as_str()) {
                self.error(GraphErrorKind::InvalidConfig, &node.id, "duplicate node id");
                continue;
            }

            match self.catalog.get(&node.uses) {
                Some(kind) => {
                    if let Err(e) = kind.validate_config(&node.config) {
                        self.error(GraphErrorKind::InvalidConfig, &node.id, format!("invalid config: {}", e));
                    }
                    self.descriptors.insert(&node.id, kind.descriptor());
                }
                None => self.error(GraphErrorKind::UnknownNodeType, &node.id, format!("unknown node type '{}'", node.uses)),
            }

            self.check_expressions(node, &node.config);

            if let Some(value) = &node.error_policy {
                match ErrorPolicy::from_value(value) {
                    Ok(policy) => {
                        self.policies.insert(&node.id, policy);
                    }
                    Err(e) => self.error(GraphErrorKind::InvalidConfig, &node.id, e),
                }
            }
        }
    }

    fn check_expressions(
        &mut self,
        node: &NodeModel,
        value: &Value,
    ) {
        match value {
            Value::String(s) if expression::is_expression(s) => {
                if let Err(e) = expression::check_syntax(s) {
                    self.error(GraphErrorKind::InvalidConfig, &node.id, e.to_string());
                }
            }
            Value::Array(items) => items.iter().for_each(|v| self.check_expressions(node, v)),
            Value::Object(map) => map.values().for_each(|v| self.check_expressions(node, v)),
            _ => {}
        }
    }

    fn check_connections(&mut self) {
        for conn in &self.model.connections {
            let edge = Edge::from(conn);
            let mut dangling = false;
            for endpoint in [&edge.source, &edge.target] {
                if !self.positions.contains_key(endpoint.as_str()) {
                    self.errors.push(GraphError::new(GraphErrorKind::DanglingReference, format!("{} references missing node '{}'", edge, endpoint)));
                    dangling = true;
                }
            }
            if dangling {
                continue;
            }

            if let Some(desc) = self.descriptors.get(edge.source.as_str())
                && !desc.accepts_output(&edge.source_port)
            {
                let message = format!("'{}' has no output port '{}'", desc.kind, edge.source_port);
                self.error(GraphErrorKind::InvalidConfig, &edge.source, message);
            }
            if let Some(desc) = self.descriptors.get(edge.target.as_str())
                && !desc.accepts_input(&edge.target_port)
            {
                let message = format!("'{}' has no input port '{}'", desc.kind, edge.target_port);
                self.error(GraphErrorKind::InvalidConfig, &edge.target, message);
            }
            self.edges.push(edge);
        }
    }

    fn check_loops(&mut self) {
        let loops: Vec<&str> = self.model.nodes.iter().map(|n| n.id.as_str()).filter(|id| self.control(id) == Control::Loop).collect();

        for loop_id in loops {
            let body = loop_body(loop_id, &self.edges);
            let mut problems = Vec::new();
            for edge in &self.edges {
                let source_in = body.contains(&edge.source);
                let target_in = body.contains(&edge.target);

                if edge.target == loop_id {
                    match (edge.is_loop_back(), source_in) {
                        (true, true) => {
                            self.back_edges.insert(edge.clone());
                        }
                        (true, false) => problems.push((loop_id.to_string(), format!("{} enters the 'loop' port from outside the loop body", edge))),
                        (false, true) => problems.push((edge.source.clone(), format!("{} must close the iteration through the 'loop' port", edge))),
                        (false, false) => {}
                    }
                } else if target_in && !source_in && !(edge.source == loop_id && edge.source_port == LOOP_BODY_PORT) {
                    problems.push((edge.target.clone(), format!("{} enters the body of loop '{}' from outside", edge, loop_id)));
                }
            }
            for (node, message) in problems {
                self.error(GraphErrorKind::InvalidConfig, &node, message);
            }
        }
    }

    fn check_cycles(&mut self) {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();
        let model = self.model;
        for node in &model.nodes {
            let id = node.id.as_str();
            if !index.contains_key(id) {
                index.insert(id, graph.add_node(id));
            }
        }
        for edge in self.edges.iter().filter(|e| !self.back_edges.contains(*e)) {
            if let (Some(source), Some(target)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
                graph.add_edge(*source, *target, ());
            }
        }

        // one error per cycle, attached to its earliest declared node
        let mut cycles: Vec<&str> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
            .filter_map(|scc| scc.into_iter().map(|idx| graph[idx]).min_by_key(|id| self.positions.get(id).copied().unwrap_or(usize::MAX)))
            .collect();
        cycles.sort_by_key(|id| self.positions.get(id).copied().unwrap_or(usize::MAX));
        for node in cycles {
            self.error(GraphErrorKind::Cycle, node, "cycle detected through node");
        }
    }

    fn check_triggers(&mut self) {
        let triggers: Vec<&str> = self.descriptors.iter().filter(|(_, d)| d.is_trigger).map(|(id, _)| *id).collect();
        if triggers.is_empty() {
            self.errors.push(GraphError::new(GraphErrorKind::InvalidConfig, "workflow has no trigger node"));
        }

        let mut incoming: HashMap<&str, usize> = HashMap::new();
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            *incoming.entry(edge.target.as_str()).or_default() += 1;
            outgoing.entry(edge.source.as_str()).or_default().push(edge.target.as_str());
        }

        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = triggers.iter().copied().collect();
        while let Some(nid) = queue.pop_front() {
            if reached.insert(nid) {
                queue.extend(outgoing.get(nid).into_iter().flatten().copied());
            }
        }

        let mut problems = Vec::new();
        for node in &self.model.nodes {
            let id = node.id.as_str();
            let has_incoming = incoming.get(id).copied().unwrap_or(0) > 0;
            if triggers.contains(&id) {
                if has_incoming {
                    problems.push((GraphErrorKind::InvalidConfig, id, "trigger nodes cannot have incoming connections"));
                }
            } else if !has_incoming {
                problems.push((GraphErrorKind::OrphanNode, id, "node has no incoming connection"));
            } else if !reached.contains(id) {
                problems.push((GraphErrorKind::OrphanNode, id, "node is not reachable from a trigger"));
            }
        }
        for (kind, node, message) in problems {
            self.error(kind, node, message);
        }
    }

    fn check_merges(&mut self) {
        let mut problems = Vec::new();
        for node in &self.model.nodes {
            if self.control(&node.id) != Control::Merge {
                continue;
            }
            let Some(declared) = node.config.get("inputs").and_then(Value::as_u64) else {
                continue;
            };
            let actual = self.edges.iter().filter(|e| e.target == node.id).count();
            if declared as usize != actual {
                problems.push((node.id.as_str(), format!("merge declares {} inputs but has {} incoming connections", declared, actual)));
            }
        }
        for (node, message) in problems {
            self.error(GraphErrorKind::InvalidConfig, node, message);
        }
    }

    fn check_branches(&mut self) {
        let mut problems = Vec::new();
        for node in &self.model.nodes {
            let Some(policy) = self.policies.get(node.id.as_str()) else {
                continue;
            };
            if !policy.uses_branch() {
                continue;
            }
            let Some(handler) = policy.handler.as_deref() else {
                continue;
            };
            if !self.positions.contains_key(handler) {
                problems.push((GraphErrorKind::DanglingReference, node.id.as_str(), format!("error handler '{}' does not exist", handler)));
            } else if !self.edges.iter().any(|e| e.source == node.id && e.source_port == ERROR_PORT && e.target == handler) {
                problems.push((GraphErrorKind::InvalidConfig, node.id.as_str(), format!("error handler '{}' is not connected from the 'error' port", handler)));
            }
        }
        for (kind, node, message) in problems {
            self.error(kind, node, message);
        }
    }

    fn control(
        &self,
        id: &str,
    ) -> Control {
        self.descriptors.get(id).map(|d| d.control).unwrap_or_default()
    }

    fn finish(self) -> ValidationResult {
        let positions = self.positions;
        let mut errors = self.errors;
        // workflow-level errors first, then by node declaration
        errors.sort_by_key(|e| e.node.as_deref().map_or(0, |n| positions.get(n).map_or(usize::MAX, |p| p + 1)));
        ValidationResult {
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{ConnectionModel, NodeModel};

    fn linear() -> WorkflowModel {
        WorkflowModel::new("wf", "linear")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("say", "log", json!({ "message": "hello {{ $trigger.name }}" })))
            .connect(ConnectionModel::new("start", "say"))
    }

    fn kinds(result: &ValidationResult) -> Vec<GraphErrorKind> {
        result.errors.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_valid_workflow() {
        let result = validate(&linear(), &Catalog::builtin());
        assert!(result.is_valid(), "{:?}", result);
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_collects_every_problem_in_declaration_order() {
        let model = linear()
            .node(NodeModel::new("ghost", "teleport", json!({})))
            .node(NodeModel::new("lonely", "log", json!({ "message": "x" })))
            .connect(ConnectionModel::new("say", "ghost"))
            .connect(ConnectionModel::new("say", "nowhere"));
        let result = validate(&model, &Catalog::builtin());

        assert_eq!(
            kinds(&result),
            vec![GraphErrorKind::DanglingReference, GraphErrorKind::UnknownNodeType, GraphErrorKind::OrphanNode]
        );
        assert_eq!(result.errors[1].node.as_deref(), Some("ghost"));
        assert_eq!(result.errors[2].node.as_deref(), Some("lonely"));
        assert_eq!(result.into_result().unwrap_err().kind, GraphErrorKind::DanglingReference);
    }

    #[test]
    fn test_config_schema_and_expressions() {
        let model = linear()
            .node(NodeModel::new("pause", "wait", json!({ "duration_ms": "soon" })))
            .node(NodeModel::new("pause2", "wait", json!({ "duration_ms": "{{ $trigger.delay }}" })))
            .node(NodeModel::new("broken", "log", json!({ "message": "{{ $prev | shout() }}" })))
            .connect(ConnectionModel::new("say", "pause"))
            .connect(ConnectionModel::new("say", "pause2"))
            .connect(ConnectionModel::new("say", "broken"));
        let result = validate(&model, &Catalog::builtin());

        let nodes: Vec<_> = result.errors.iter().map(|e| e.node.as_deref().unwrap()).collect();
        assert_eq!(nodes, vec!["pause", "broken"]);
        assert!(kinds(&result).iter().all(|k| *k == GraphErrorKind::InvalidConfig));
    }

    #[test]
    fn test_cycle_and_trigger_rules() {
        let model = linear()
            .node(NodeModel::new("again", "log", json!({ "message": "x" })))
            .connect(ConnectionModel::new("say", "again"))
            .connect(ConnectionModel::new("again", "say"));
        assert!(kinds(&validate(&model, &Catalog::builtin())).contains(&GraphErrorKind::Cycle));

        let model = WorkflowModel::new("wf", "no trigger").node(NodeModel::new("say", "log", json!({ "message": "x" })));
        let result = validate(&model, &Catalog::builtin());
        assert_eq!(result.errors[0].message, "workflow has no trigger node");
        assert_eq!(result.errors[0].node, None);
    }

    #[test]
    fn test_cycle_report_is_stable() {
        let model = WorkflowModel::new("wf", "ring")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("a", "log", json!({ "message": "a" })))
            .node(NodeModel::new("b", "log", json!({ "message": "b" })))
            .node(NodeModel::new("c", "log", json!({ "message": "c" })))
            .node(NodeModel::new("d", "log", json!({ "message": "d" })))
            .connect(ConnectionModel::new("start", "a"))
            .connect(ConnectionModel::new("a", "b"))
            .connect(ConnectionModel::new("b", "c"))
            .connect(ConnectionModel::new("c", "d"))
            .connect(ConnectionModel::new("d", "a"));

        let first = validate(&model, &Catalog::builtin());
        assert_eq!(kinds(&first), vec![GraphErrorKind::Cycle]);
        assert_eq!(first.errors[0].node.as_deref(), Some("a"));
        for _ in 0..100 {
            assert_eq!(validate(&model, &Catalog::builtin()), first);
        }
    }

    #[test]
    fn test_ports_are_checked_against_descriptors() {
        let model = linear()
            .node(NodeModel::new("after", "log", json!({ "message": "x" })))
            .connect(ConnectionModel::new("say", "after").from_port("maybe"))
            .connect(ConnectionModel::new("start", "after").from_port("error"));
        let result = validate(&model, &Catalog::builtin());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].node.as_deref(), Some("say"));
    }

    #[test]
    fn test_loop_back_edges_are_not_cycles() {
        let model = linear()
            .node(NodeModel::new("each", "loop", json!({ "items": "{{ $trigger.items }}" })))
            .node(NodeModel::new("work", "set", json!({ "values": { "x": "{{ $loop.item }}" } })))
            .node(NodeModel::new("done", "log", json!({ "message": "{{ $prev }}" })))
            .connect(ConnectionModel::new("say", "each"))
            .connect(ConnectionModel::new("each", "work").from_port("body"))
            .connect(ConnectionModel::new("work", "each").to_port("loop"))
            .connect(ConnectionModel::new("each", "done"));
        let result = validate(&model, &Catalog::builtin());
        assert!(result.is_valid(), "{:?}", result);

        let model = model.connect(ConnectionModel::new("say", "each").to_port("loop"));
        let result = validate(&model, &Catalog::builtin());
        assert_eq!(kinds(&result), vec![GraphErrorKind::InvalidConfig]);
        assert_eq!(result.errors[0].node.as_deref(), Some("each"));
    }

    #[test]
    fn test_merge_input_count_must_match() {
        let model = linear()
            .node(NodeModel::new("join", "merge", json!({ "inputs": 2 })))
            .connect(ConnectionModel::new("say", "join"));
        let result = validate(&model, &Catalog::builtin());
        assert_eq!(kinds(&result), vec![GraphErrorKind::InvalidConfig]);
        assert!(result.errors[0].message.contains("declares 2 inputs"));
    }

    #[test]
    fn test_branch_handler_must_hang_off_error_port() {
        let branch = json!({ "strategy": "branch", "handler": "rescue" });
        let model = WorkflowModel::new("wf", "branch")
            .node(NodeModel::new("start", "trigger", json!({})))
            .node(NodeModel::new("call", "http_request", json!({ "url": "http://localhost" })).with_policy(branch.clone()))
            .node(NodeModel::new("rescue", "log", json!({ "message": "failed" })))
            .connect(ConnectionModel::new("start", "call"))
            .connect(ConnectionModel::new("call", "rescue"));
        let result = validate(&model, &Catalog::builtin());
        assert_eq!(kinds(&result), vec![GraphErrorKind::InvalidConfig]);

        let mut fixed = model.clone();
        fixed.connections[1] = ConnectionModel::new("call", "rescue").from_port("error");
        assert!(validate(&fixed, &Catalog::builtin()).is_valid());

        let mut missing = fixed.clone();
        missing.nodes[1].error_policy = Some(json!({ "strategy": "branch", "handler": "nobody" }));
        assert_eq!(kinds(&validate(&missing, &Catalog::builtin())), vec![GraphErrorKind::DanglingReference]);

        missing.nodes[1].error_policy = Some(json!({ "strategy": "retry" }));
        assert_eq!(kinds(&validate(&missing, &Catalog::builtin())), vec![GraphErrorKind::InvalidConfig]);
    }

    #[test]
    fn test_validation_is_idempotent_across_save_and_reload() {
        let model = linear().node(NodeModel::new("ghost", "teleport", json!({}))).connect(ConnectionModel::new("say", "ghost"));
        let first = validate(&model, &Catalog::builtin());

        let reloaded = WorkflowModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, model);
        assert_eq!(validate(&reloaded, &Catalog::builtin()), first);
    }
}
