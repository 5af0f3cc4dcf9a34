//! Weighted progress tracking across nested containers. Groups and parallel
//! blocks are *transparent*: their children contribute directly to the
//! overall weight. Loops are *opaque*: the loop itself is one weighted entry
//! regardless of how many iterations it runs.

use dashmap::DashMap;

use crate::definition::{Definition, NodeKind};

/// Relative weight of a leaf kind in the overall percentage. Unknown kinds
/// fall back to the default weight.
fn leaf_weight(kind: &str) -> u32 {
    match kind {
        "shell-command" => 300,
        "http-request" => 200,
        "image" => 150,
        "spreadsheet" => 100,
        "loop" => 100,
        "edit-fields" | "transform" | "file-system" => 50,
        _ => 100,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    weight: u32,
    state: NodeState,
    /// 0..=100, meaningful while `state == Running` (e.g. loop iteration
    /// count); otherwise derived from `state`.
    progress: u8,
}

impl Entry {
    fn effective_progress(&self) -> u32 {
        match self.state {
            NodeState::Completed => 100,
            NodeState::Skipped => 100,
            NodeState::Failed => 0,
            NodeState::Running => self.progress as u32,
            NodeState::Pending => 0,
        }
    }
}

/// Flattens a container's node tree into the set of entries that contribute
/// to the weighted percentage, descending through transparent containers.
pub struct ProgressModel {
    entries: DashMap<String, Entry>,
    total_weight: u32,
}

impl ProgressModel {
    /// Walk `root`'s tree, registering one entry per leaf and per loop, and
    /// recursing into group/parallel children transparently.
    pub fn build(root: &Definition) -> Self {
        let entries = DashMap::new();
        let mut total_weight = 0u32;
        Self::collect(root, &entries, &mut total_weight);
        Self { entries, total_weight }
    }

    fn collect(node: &Definition, entries: &DashMap<String, Entry>, total_weight: &mut u32) {
        if node.is_progress_transparent() {
            for child in &node.nodes {
                Self::collect(child, entries, total_weight);
            }
            return;
        }

        let weight = match node.node_kind() {
            NodeKind::Loop => leaf_weight("loop"),
            NodeKind::Leaf(kind) => leaf_weight(kind),
            NodeKind::Group | NodeKind::Parallel => unreachable!("transparent containers handled above"),
        };
        *total_weight += weight;
        entries.insert(
            node.id.clone(),
            Entry {
                weight,
                state: NodeState::Pending,
                progress: 0,
            },
        );
    }

    pub fn set_node_state(&self, node_id: &str, state: NodeState) {
        if let Some(mut entry) = self.entries.get_mut(node_id) {
            entry.state = state;
            if state == NodeState::Running {
                entry.progress = 0;
            }
        }
    }

    /// Sub-progress within a running opaque container (e.g. a loop's
    /// iteration count as a 0..=100 fraction of its total iterations).
    pub fn set_node_progress(&self, node_id: &str, percent: u8) {
        if let Some(mut entry) = self.entries.get_mut(node_id) {
            entry.progress = percent.min(100);
        }
    }

    /// `floor(sum(weight * effective_progress) / total_weight)`, clamped to
    /// 0..=100. Zero entries (an empty bento) report 100.
    pub fn overall_percent(&self) -> u8 {
        if self.total_weight == 0 {
            return 100;
        }
        let numerator: u64 = self
            .entries
            .iter()
            .map(|entry| entry.weight as u64 * entry.effective_progress() as u64)
            .sum();
        let percent = numerator / self.total_weight as u64;
        percent.min(100) as u8
    }

    pub fn node_state(&self, node_id: &str) -> Option<NodeState> {
        self.entries.get(node_id).map(|e| e.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn node(id: &str, kind: &str, children: Vec<Definition>) -> Definition {
        Definition {
            id: id.to_string(),
            kind: kind.to_string(),
            name: id.to_string(),
            version: None,
            parameters: Map::new(),
            nodes: children,
            edges: vec![],
            position: None,
            input_ports: None,
            output_ports: None,
        }
    }

    #[test]
    fn group_descends_transparently_into_leaf_weights() {
        let def = node(
            "root",
            "group",
            vec![node("a", "shell-command", vec![]), node("b", "edit-fields", vec![])],
        );
        let model = ProgressModel::build(&def);
        assert_eq!(model.total_weight, 350);
        assert!(model.node_state("a").is_some());
        assert!(model.node_state("b").is_some());
    }

    #[test]
    fn loop_is_a_single_opaque_entry() {
        let def = node(
            "root",
            "group",
            vec![node(
                "l1",
                "loop",
                vec![node("inner", "shell-command", vec![])],
            )],
        );
        let model = ProgressModel::build(&def);
        assert_eq!(model.total_weight, 100);
        assert!(model.node_state("l1").is_some());
        assert!(model.node_state("inner").is_none());
    }

    #[test]
    fn overall_percent_tracks_weighted_completion() {
        let def = node(
            "root",
            "group",
            vec![node("a", "shell-command", vec![]), node("b", "edit-fields", vec![])],
        );
        let model = ProgressModel::build(&def);
        assert_eq!(model.overall_percent(), 0);
        model.set_node_state("a", NodeState::Completed);
        // 300 / 350 = 85
        assert_eq!(model.overall_percent(), 85);
        model.set_node_state("b", NodeState::Completed);
        assert_eq!(model.overall_percent(), 100);
    }

    #[test]
    fn running_loop_reports_partial_progress() {
        let def = node("root", "group", vec![node("l1", "loop", vec![])]);
        let model = ProgressModel::build(&def);
        model.set_node_state("l1", NodeState::Running);
        model.set_node_progress("l1", 40);
        assert_eq!(model.overall_percent(), 40);
    }

    #[test]
    fn empty_container_reports_full_progress() {
        let def = node("root", "group", vec![]);
        let model = ProgressModel::build(&def);
        assert_eq!(model.overall_percent(), 100);
    }

    #[test]
    fn failed_node_contributes_zero_progress() {
        let def = node("root", "group", vec![node("a", "shell-command", vec![])]);
        let model = ProgressModel::build(&def);
        model.set_node_state("a", NodeState::Failed);
        assert_eq!(model.overall_percent(), 0);
    }

    #[test]
    fn one_failed_sibling_drags_overall_percent_down() {
        let def = node(
            "root",
            "group",
            vec![node("a", "shell-command", vec![]), node("b", "edit-fields", vec![])],
        );
        let model = ProgressModel::build(&def);
        model.set_node_state("a", NodeState::Completed);
        model.set_node_state("b", NodeState::Failed);
        // 300 completed / 350 total, b contributes 0
        assert_eq!(model.overall_percent(), 85);
    }
}
