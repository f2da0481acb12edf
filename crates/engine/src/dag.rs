//! Graph analysis over the workflow IR: reachability, dominance (for static
//! template validation), and cycle detection.
//!
//! Cycles are permitted in this IR (looping workflows, bounded by
//! `max_visits`), unlike the teacher's original DAG-only model, so this
//! module never rejects a graph outright — it hands diagnostics and
//! structural facts to `validate.rs` and `compile.rs`.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{EdgeSpec, NodeSpec};

/// Adjacency view built once per validation/compile pass.
pub struct Graph<'a> {
    pub node_ids: Vec<&'a str>,
    pub successors: HashMap<&'a str, Vec<&'a str>>,
    pub predecessors: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Graph<'a> {
    pub fn build(nodes: &'a [NodeSpec], edges: &'a [EdgeSpec]) -> Self {
        let node_ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut predecessors: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &node_ids {
            successors.entry(id).or_default();
            predecessors.entry(id).or_default();
        }
        for edge in edges {
            successors.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            predecessors.entry(edge.to.as_str()).or_default().push(edge.from.as_str());
        }
        Self {
            node_ids,
            successors,
            predecessors,
        }
    }

    /// Direct predecessors of `node_id`, used by `CompiledNode::predecessors`.
    pub fn direct_predecessors(&self, node_id: &str) -> HashSet<String> {
        self.predecessors
            .get(node_id)
            .map(|ps| ps.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    /// Every node reachable from `start` via a directed path (including
    /// `start` itself).
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        seen.insert(start.to_string());
        while let Some(cur) = queue.pop_front() {
            if let Some(next) = self.successors.get(cur) {
                for &n in next {
                    if seen.insert(n.to_string()) {
                        queue.push_back(n);
                    }
                }
            }
        }
        seen
    }

    /// Nodes that participate in at least one cycle (used for warning
    /// diagnostics, never a hard failure — loops are legal).
    pub fn cyclic_nodes(&self) -> HashSet<String> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        for id in &self.node_ids {
            in_degree.insert(id, 0);
        }
        for next in self.successors.values() {
            for &n in next {
                *in_degree.entry(n).or_insert(0) += 1;
            }
        }
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut removed = HashSet::new();
        while let Some(id) = queue.pop_front() {
            removed.insert(id);
            if let Some(next) = self.successors.get(id) {
                for &n in next {
                    let deg = in_degree.get_mut(n).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(n);
                    }
                }
            }
        }
        self.node_ids
            .iter()
            .filter(|id| !removed.contains(*id))
            .map(|s| s.to_string())
            .collect()
    }

    /// Dominator sets: `dominators(n)` is every node guaranteed to have run
    /// to completion before `n` on every path from `start`, `n` included.
    /// Computed with the classic iterative fixed-point algorithm so it
    /// terminates even in the presence of cycles.
    pub fn dominators(&self, start: &str) -> HashMap<String, HashSet<String>> {
        let reachable = self.reachable_from(start);
        let all: HashSet<String> = reachable.clone();
        let mut dom: HashMap<String, HashSet<String>> = HashMap::new();
        for id in &reachable {
            if id == start {
                let mut s = HashSet::new();
                s.insert(start.to_string());
                dom.insert(id.clone(), s);
            } else {
                dom.insert(id.clone(), all.clone());
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for id in &reachable {
                if id == start {
                    continue;
                }
                let preds = self.direct_predecessors(id);
                let relevant: Vec<&String> = preds.iter().filter(|p| reachable.contains(*p)).collect();
                if relevant.is_empty() {
                    continue;
                }
                let mut new_set = dom[relevant[0]].clone();
                for p in &relevant[1..] {
                    new_set = new_set.intersection(&dom[*p]).cloned().collect();
                }
                new_set.insert(id.clone());
                if &new_set != dom.get(id).unwrap() {
                    dom.insert(id.clone(), new_set);
                    changed = true;
                }
            }
        }
        dom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            node_type: "mock".to_string(),
            params: serde_json::Map::new(),
        }
    }

    fn edge(from: &str, to: &str) -> EdgeSpec {
        EdgeSpec {
            from: from.to_string(),
            to: to.to_string(),
            action: "default".to_string(),
        }
    }

    #[test]
    fn linear_graph_dominators_are_all_ancestors() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![edge("a", "b"), edge("b", "c")];
        let graph = Graph::build(&nodes, &edges);
        let dom = graph.dominators("a");
        assert_eq!(dom["c"], ["a", "b", "c"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn diamond_join_dominator_is_only_the_shared_ancestor() {
        let nodes = vec![node("a"), node("b"), node("c"), node("d")];
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        let graph = Graph::build(&nodes, &edges);
        let dom = graph.dominators("a");
        assert_eq!(dom["d"], ["a", "d"].iter().map(|s| s.to_string()).collect());
    }

    #[test]
    fn unreachable_node_is_excluded_from_reachable_set() {
        let nodes = vec![node("a"), node("b"), node("isolated")];
        let edges = vec![edge("a", "b")];
        let graph = Graph::build(&nodes, &edges);
        let reachable = graph.reachable_from("a");
        assert!(!reachable.contains("isolated"));
    }

    #[test]
    fn self_loop_is_cyclic() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![edge("a", "b"), edge("b", "b")];
        let graph = Graph::build(&nodes, &edges);
        assert!(graph.cyclic_nodes().contains("b"));
    }
}
