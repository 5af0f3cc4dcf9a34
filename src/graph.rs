//! Builds and queries a DAG of a container's children. Mandatory cycle check
//! before any child runs; the ready-set walk during execution is driven by
//! `NodeExecutor` using `StartNodes`/`Targets`/`MarkExecuted`/`IsReady`.

use std::collections::{HashMap, HashSet};

use crate::definition::Definition;
use crate::error::{BuildError, CycleError};

/// One container's graph: children keyed by id, out-edges, and in-degree
/// bookkeeping. Discarded after the container finishes executing.
pub struct Graph {
    order: Vec<String>,
    out_edges: HashMap<String, Vec<String>>,
    in_degree: HashMap<String, usize>,
    executed: HashSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Color {
    White,
    Gray,
    Black,
}

impl Graph {
    /// Collect every id from `container.nodes` (duplicates are ill-formed);
    /// validate every edge endpoint names a known id.
    pub fn build(container: &Definition) -> Result<Self, BuildError> {
        let mut order = Vec::with_capacity(container.nodes.len());
        let mut out_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut seen = HashSet::new();

        for child in &container.nodes {
            if !seen.insert(child.id.clone()) {
                return Err(BuildError::DuplicateId(child.id.clone()));
            }
            order.push(child.id.clone());
            out_edges.entry(child.id.clone()).or_default();
            in_degree.entry(child.id.clone()).or_insert(0);
        }

        for edge in &container.edges {
            if !seen.contains(&edge.source_id) {
                return Err(BuildError::UnknownEdgeEndpoint(edge.source_id.clone()));
            }
            if !seen.contains(&edge.target_id) {
                return Err(BuildError::UnknownEdgeEndpoint(edge.target_id.clone()));
            }
            out_edges
                .entry(edge.source_id.clone())
                .or_default()
                .push(edge.target_id.clone());
            *in_degree.entry(edge.target_id.clone()).or_insert(0) += 1;
        }

        Ok(Self {
            order,
            out_edges,
            in_degree,
            executed: HashSet::new(),
        })
    }

    /// Nodes with in-degree zero, in insertion order (deterministic).
    pub fn start_nodes(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.in_degree.get(*id).copied().unwrap_or(0) == 0)
            .cloned()
            .collect()
    }

    pub fn targets(&self, id: &str) -> &[String] {
        self.out_edges.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Decrement in-degree of every target of `id` and record `id` as executed.
    pub fn mark_executed(&mut self, id: &str) {
        self.executed.insert(id.to_string());
        let targets = self.out_edges.get(id).cloned().unwrap_or_default();
        for target in targets {
            if let Some(deg) = self.in_degree.get_mut(&target) {
                *deg = deg.saturating_sub(1);
            }
        }
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.in_degree.get(id).copied().unwrap_or(0) == 0
    }

    pub fn is_executed(&self, id: &str) -> bool {
        self.executed.contains(id)
    }

    /// DFS three-coloring cycle check. Run before scheduling.
    pub fn has_cycle(&self) -> Result<(), CycleError> {
        let mut color: HashMap<&str, Color> =
            self.order.iter().map(|id| (id.as_str(), Color::White)).collect();

        for start in &self.order {
            if color.get(start.as_str()) == Some(&Color::White) {
                self.visit(start, &mut color)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(&'a self, id: &'a str, color: &mut HashMap<&'a str, Color>) -> Result<(), CycleError> {
        color.insert(id, Color::Gray);
        if let Some(targets) = self.out_edges.get(id) {
            for target in targets {
                match color.get(target.as_str()) {
                    Some(Color::Gray) => return Err(CycleError(target.clone())),
                    Some(Color::Black) => continue,
                    _ => self.visit(target.as_str(), color)?,
                }
            }
        }
        color.insert(id, Color::Black);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use serde_json::Map;

    fn leaf(id: &str) -> Definition {
        Definition {
            id: id.to_string(),
            kind: "edit-fields".to_string(),
            name: id.to_string(),
            version: None,
            parameters: Map::new(),
            nodes: vec![],
            edges: vec![],
            position: None,
            input_ports: None,
            output_ports: None,
        }
    }

    fn edge(source: &str, target: &str) -> crate::definition::Edge {
        crate::definition::Edge {
            id: format!("{source}->{target}"),
            source_id: source.to_string(),
            target_id: target.to_string(),
        }
    }

    fn container(nodes: Vec<Definition>, edges: Vec<crate::definition::Edge>) -> Definition {
        Definition {
            id: "root".into(),
            kind: "group".into(),
            name: "root".into(),
            version: None,
            parameters: Map::new(),
            nodes,
            edges,
            position: None,
            input_ports: None,
            output_ports: None,
        }
    }

    #[test]
    fn chain_has_single_start_node() {
        let def = container(
            vec![leaf("a"), leaf("b"), leaf("c")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        let graph = Graph::build(&def).unwrap();
        assert_eq!(graph.start_nodes(), vec!["a".to_string()]);
        assert_eq!(graph.targets("a"), &["b".to_string()]);
    }

    #[test]
    fn disconnected_nodes_are_all_start_nodes() {
        let def = container(vec![leaf("a"), leaf("b"), leaf("c")], vec![]);
        let graph = Graph::build(&def).unwrap();
        let starts = graph.start_nodes();
        assert_eq!(starts.len(), 3);
    }

    #[test]
    fn duplicate_id_is_build_error() {
        let def = container(vec![leaf("a"), leaf("a")], vec![]);
        assert_eq!(Graph::build(&def).unwrap_err(), BuildError::DuplicateId("a".into()));
    }

    #[test]
    fn unknown_edge_endpoint_is_build_error() {
        let def = container(vec![leaf("a")], vec![edge("a", "missing")]);
        assert_eq!(
            Graph::build(&def).unwrap_err(),
            BuildError::UnknownEdgeEndpoint("missing".into())
        );
    }

    #[test]
    fn mark_executed_unblocks_targets() {
        let def = container(vec![leaf("a"), leaf("b")], vec![edge("a", "b")]);
        let mut graph = Graph::build(&def).unwrap();
        assert!(!graph.is_ready("b"));
        graph.mark_executed("a");
        assert!(graph.is_ready("b"));
        assert!(graph.is_executed("a"));
    }

    #[test]
    fn cycle_is_detected() {
        let def = container(
            vec![leaf("a"), leaf("b"), leaf("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "a")],
        );
        let graph = Graph::build(&def).unwrap();
        assert!(graph.has_cycle().is_err());
    }

    #[test]
    fn acyclic_fan_out_has_no_cycle() {
        let def = container(
            vec![leaf("a"), leaf("b"), leaf("c")],
            vec![edge("a", "b"), edge("a", "c")],
        );
        let graph = Graph::build(&def).unwrap();
        assert!(graph.has_cycle().is_ok());
    }
}
