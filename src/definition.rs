//! Wire format for a workflow definition ("bento"): a tree of nodes plus the
//! edges that order them within each container.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single data/ordering dependency between two children of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
}

/// One node of a bento: a leaf (external capability) or a container (group,
/// loop, parallel). Containers carry their own `nodes`/`edges`; leaves leave
/// both empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub nodes: Vec<Definition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub position: Option<Value>,
    #[serde(default)]
    pub input_ports: Option<Value>,
    #[serde(default)]
    pub output_ports: Option<Value>,
}

/// The engine's built-in container kinds, plus a catch-all for leaf kinds
/// which are always plug-in instances obtained from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind<'a> {
    Group,
    Loop,
    Parallel,
    Leaf(&'a str),
}

impl Definition {
    pub fn node_kind(&self) -> NodeKind<'_> {
        match self.kind.as_str() {
            "group" => NodeKind::Group,
            "loop" => NodeKind::Loop,
            "parallel" => NodeKind::Parallel,
            other => NodeKind::Leaf(other),
        }
    }

    /// Whether this container contributes its children directly to the
    /// progress graph instead of a single entry for itself (group/parallel).
    pub fn is_progress_transparent(&self) -> bool {
        matches!(self.node_kind(), NodeKind::Group | NodeKind::Parallel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leaf(id: &str, kind: &str) -> Definition {
        Definition {
            id: id.to_string(),
            kind: kind.to_string(),
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

    #[test]
    fn definition_roundtrips_through_json() {
        let mut def = leaf("n1", "edit-fields");
        def.parameters.insert("step".into(), json!(1));
        def.position = Some(json!({"x": 10, "y": 20}));
        def.nodes.push(leaf("n2", "edit-fields"));
        def.edges.push(Edge {
            id: "e1".into(),
            source_id: "n1".into(),
            target_id: "n2".into(),
        });

        let wire = serde_json::to_string(&def).unwrap();
        let restored: Definition = serde_json::from_str(&wire).unwrap();
        assert_eq!(restored, def);
        assert_eq!(restored.position, Some(json!({"x": 10, "y": 20})));
    }

    #[test]
    fn node_kind_classifies_containers_and_leaves() {
        assert_eq!(leaf("g", "group").node_kind(), NodeKind::Group);
        assert_eq!(leaf("l", "loop").node_kind(), NodeKind::Loop);
        assert_eq!(leaf("p", "parallel").node_kind(), NodeKind::Parallel);
        assert_eq!(leaf("h", "http-request").node_kind(), NodeKind::Leaf("http-request"));
    }

    #[test]
    fn group_and_parallel_are_progress_transparent_loop_is_not() {
        assert!(leaf("g", "group").is_progress_transparent());
        assert!(leaf("p", "parallel").is_progress_transparent());
        assert!(!leaf("l", "loop").is_progress_transparent());
        assert!(!leaf("h", "http-request").is_progress_transparent());
    }
}
