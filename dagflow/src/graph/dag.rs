//! The configuration DAG.
//!
//! Nodes are stored in a petgraph `DiGraph` in document order. Edge direction
//! means "runs before". Neighbor lists are reported in declared order.

use crate::errors::GraphError;
use petgraph::algo::{all_simple_paths, has_path_connecting};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

/// A node in the configuration DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    /// Unique instance name.
    pub name: String,
    /// Section the node was declared in.
    pub section: String,
    /// Whether the node can prune its destinations at run time.
    pub conditional: bool,
}

/// Directed graph of node declarations.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationDag {
    graph: DiGraph<DagNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl ConfigurationDag {
    /// Creates an empty DAG.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateNode` if the name is already present.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        section: impl Into<String>,
    ) -> Result<(), GraphError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateNode { name });
        }
        tracing::debug!(node = %name, "Adding node");
        let idx = self.graph.add_node(DagNode {
            name: name.clone(),
            section: section.into(),
            conditional: false,
        });
        self.index.insert(name, idx);
        Ok(())
    }

    /// Flags a node as a conditional-path node.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn mark_conditional(&mut self, name: &str) -> Result<(), GraphError> {
        let idx = self.idx(name)?;
        self.graph[idx].conditional = true;
        Ok(())
    }

    /// Adds the edge `from -> to`. Adding an existing edge again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDestination` if `to` is not declared, or `UnknownNode`
    /// if `from` is not.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let source = self.idx(from)?;
        let Some(&target) = self.index.get(to) else {
            return Err(GraphError::UnknownDestination {
                node: from.to_string(),
                destination: to.to_string(),
            });
        };
        tracing::debug!(from = %from, to = %to, "Adding edge");
        self.graph.update_edge(source, target, ());
        Ok(())
    }

    fn idx(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode {
                name: name.to_string(),
            })
    }

    fn name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx].name
    }

    /// Returns true if the node is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node names in insertion order.
    #[must_use]
    pub fn node_names(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .map(|idx| self.name(idx).to_string())
            .collect()
    }

    /// The section a node was declared in.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn section_of(&self, name: &str) -> Result<&str, GraphError> {
        let idx = self.idx(name)?;
        Ok(&self.graph[idx].section)
    }

    /// Returns true if the node is a conditional-path node.
    #[must_use]
    pub fn is_conditional(&self, name: &str) -> bool {
        self.index
            .get(name)
            .is_some_and(|&idx| self.graph[idx].conditional)
    }

    fn neighbors_in_order(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        // petgraph yields the most recently added edge first.
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        neighbors.reverse();
        neighbors
    }

    /// Direct downstream nodes in declared order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn successors(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let idx = self.idx(name)?;
        Ok(self
            .neighbors_in_order(idx, Direction::Outgoing)
            .into_iter()
            .map(|n| self.name(n).to_string())
            .collect())
    }

    /// Direct upstream nodes, in the order their edges were added.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn predecessors(&self, name: &str) -> Result<Vec<String>, GraphError> {
        let idx = self.idx(name)?;
        Ok(self
            .neighbors_in_order(idx, Direction::Incoming)
            .into_iter()
            .map(|n| self.name(n).to_string())
            .collect())
    }

    /// Direct upstream nodes mapped to their sections.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn predecessors_by_type(&self, name: &str) -> Result<BTreeMap<String, String>, GraphError> {
        let idx = self.idx(name)?;
        Ok(self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| (self.graph[n].name.clone(), self.graph[n].section.clone()))
            .collect())
    }

    /// All nodes with a path to `name`, optionally restricted to one section.
    /// The node itself is not included.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn ancestors_of_type(
        &self,
        name: &str,
        section: Option<&str>,
    ) -> Result<BTreeSet<String>, GraphError> {
        let start = self.idx(name)?;
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut ancestors = BTreeSet::new();
        while let Some(idx) = dfs.next(reversed) {
            if idx == start {
                continue;
            }
            let node = &self.graph[idx];
            if section.map_or(true, |s| node.section == s) {
                ancestors.insert(node.name.clone());
            }
        }
        Ok(ancestors)
    }

    /// All nodes reachable from `name`, not including `name` itself.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if the node is not present.
    pub fn descendants(&self, name: &str) -> Result<BTreeSet<String>, GraphError> {
        let start = self.idx(name)?;
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = BTreeSet::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                found.insert(self.name(idx).to_string());
            }
        }
        Ok(found)
    }

    /// Returns true if there is a directed path from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if either node is not present.
    pub fn has_path(&self, from: &str, to: &str) -> Result<bool, GraphError> {
        let a = self.idx(from)?;
        let b = self.idx(to)?;
        Ok(has_path_connecting(&self.graph, a, b, None))
    }

    /// All simple paths from `from` to `to`, or `None` if `to` is unreachable.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if either node is not present.
    pub fn all_simple_paths(
        &self,
        from: &str,
        to: &str,
    ) -> Result<Option<Vec<Vec<String>>>, GraphError> {
        let a = self.idx(from)?;
        let b = self.idx(to)?;
        if !has_path_connecting(&self.graph, a, b, None) {
            return Ok(None);
        }
        let mut paths: Vec<Vec<String>> = all_simple_paths::<Vec<NodeIndex>, _>(&self.graph, a, b, 0, None)
            .map(|path| path.into_iter().map(|idx| self.name(idx).to_string()).collect())
            .collect();
        paths.sort();
        Ok(Some(paths))
    }

    /// Names of all nodes declared in `section`, in insertion order.
    #[must_use]
    pub fn nodes_of_type(&self, section: &str) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].section == section)
            .map(|idx| self.name(idx).to_string())
            .collect()
    }

    /// Nodes with at least one outgoing edge and no incoming edges.
    #[must_use]
    pub fn starting_nodes(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .next()
                    .is_none()
                    && self
                        .graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .next()
                        .is_some()
            })
            .map(|idx| self.name(idx).to_string())
            .collect()
    }

    /// Checks that the graph has no directed cycle. A self-loop is a cycle.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` with the first cycle found.
    pub fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for idx in self.graph.node_indices() {
            if !visited.contains(&idx) {
                if let Some(cycle) = self.dfs_cycle(idx, &mut visited, &mut rec_stack, &mut path) {
                    return Err(GraphError::CycleDetected { cycle });
                }
            }
        }

        tracing::info!("OK: no cycles found");
        Ok(())
    }

    fn dfs_cycle(
        &self,
        root: NodeIndex,
        visited: &mut HashSet<NodeIndex>,
        rec_stack: &mut HashSet<NodeIndex>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<String>> {
        visited.insert(root);
        rec_stack.insert(root);
        path.push(root);
        let mut frames = vec![self.neighbors_in_order(root, Direction::Outgoing).into_iter()];

        while let Some(frame) = frames.last_mut() {
            let Some(next) = frame.next() else {
                frames.pop();
                if let Some(done) = path.pop() {
                    rec_stack.remove(&done);
                }
                continue;
            };

            if rec_stack.contains(&next) {
                let start = path.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..]
                    .iter()
                    .map(|&n| self.name(n).to_string())
                    .collect();
                cycle.push(self.name(next).to_string());
                return Some(cycle);
            }
            if visited.insert(next) {
                rec_stack.insert(next);
                path.push(next);
                frames.push(self.neighbors_in_order(next, Direction::Outgoing).into_iter());
            }
        }
        None
    }

    /// Checks that the graph forms a single component, ignoring direction.
    ///
    /// # Errors
    ///
    /// Returns `DisconnectedGraph` listing each component.
    pub fn check_connected(&self) -> Result<(), GraphError> {
        let mut sets = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }

        let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            groups
                .entry(sets.find(idx.index()))
                .or_default()
                .push(self.name(idx).to_string());
        }

        if groups.len() > 1 {
            let mut components: Vec<Vec<String>> = groups
                .into_values()
                .map(|mut members| {
                    members.sort();
                    members
                })
                .collect();
            components.sort();
            return Err(GraphError::DisconnectedGraph { components });
        }

        tracing::info!("OK: 1 connected component");
        Ok(())
    }

    /// Runs the connectivity check and then the cycle check.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn check_dag(&self) -> Result<(), GraphError> {
        self.check_connected()?;
        self.check_acyclic()
    }

    /// Depth-first post-order over the whole graph.
    ///
    /// Traversal starts from every unvisited node in insertion order and
    /// follows destinations in declared order, so the result is deterministic.
    #[must_use]
    pub fn depth_first_postorder(&self) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(self.graph.node_count());
        for idx in self.graph.node_indices() {
            if !visited.contains(&idx) {
                self.postorder_from(idx, &mut visited, &mut order);
            }
        }
        order
    }

    fn postorder_from(&self, root: NodeIndex, visited: &mut HashSet<NodeIndex>, order: &mut Vec<String>) {
        visited.insert(root);
        let mut frames = vec![(root, self.neighbors_in_order(root, Direction::Outgoing).into_iter())];

        while let Some((node, pending)) = frames.last_mut() {
            if let Some(next) = pending.find(|n| !visited.contains(n)) {
                visited.insert(next);
                frames.push((next, self.neighbors_in_order(next, Direction::Outgoing).into_iter()));
            } else {
                order.push(self.name(*node).to_string());
                frames.pop();
            }
        }
    }

    /// Reversed depth-first post-order: every node precedes its destinations.
    #[must_use]
    pub fn depth_first_order(&self) -> Vec<String> {
        let mut order = self.depth_first_postorder();
        order.reverse();
        order
    }

    /// Renders the graph as Graphviz DOT text.
    ///
    /// When `sequence` is given, labels are prefixed with each node's
    /// position in it.
    #[must_use]
    pub fn to_dot(&self, sequence: Option<&[String]>) -> String {
        let positions: HashMap<&str, usize> = sequence
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i + 1))
            .collect();

        let mut out = String::from("digraph dagflow {\n    rankdir=LR;\n    node [style=filled];\n");
        for idx in self.graph.node_indices() {
            let node = &self.graph[idx];
            let label = positions.get(node.name.as_str()).map_or_else(
                || node.name.clone(),
                |pos| format!("{pos}: {}", node.name),
            );
            let shape = if node.conditional { "diamond" } else { "box" };
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\", shape={shape}, fillcolor=\"{}\"];",
                escape(&node.name),
                escape(&label),
                section_color(&node.section),
            );
        }
        for edge in self.graph.edge_references() {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\";",
                escape(self.name(edge.source())),
                escape(self.name(edge.target())),
            );
        }
        out.push_str("}\n");
        out
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn section_color(section: &str) -> &'static str {
    match section {
        "reader_config" => "#fbb4ae",
        "pipeline_config" => "#b3cde3",
        "model_config" => "#ccebc5",
        "writer_config" => "#decbe4",
        _ => "#fed9a6",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build(nodes: &[(&str, &str)], edges: &[(&str, &str)]) -> ConfigurationDag {
        let mut dag = ConfigurationDag::new();
        for (name, section) in nodes {
            dag.add_node(*name, *section).unwrap();
        }
        for (from, to) in edges {
            dag.add_edge(from, to).unwrap();
        }
        dag
    }

    fn diamond() -> ConfigurationDag {
        build(
            &[
                ("a", "reader_config"),
                ("b", "pipeline_config"),
                ("c", "pipeline_config"),
                ("d", "writer_config"),
            ],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        )
    }

    #[test]
    fn test_chain_depth_first_order() {
        let dag = build(
            &[("a", "reader_config"), ("b", "pipeline_config"), ("c", "writer_config")],
            &[("a", "b"), ("b", "c")],
        );
        assert_eq!(dag.depth_first_order(), vec!["a", "b", "c"]);
        assert_eq!(dag.depth_first_postorder(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_diamond_sink_is_last() {
        let order = diamond().depth_first_order();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("d") > pos("b"));
        assert!(pos("d") > pos("c"));
        assert_eq!(pos("a"), 0);
    }

    #[test]
    fn test_order_independent_of_declaration_order() {
        let dag = build(
            &[("writer", "writer_config"), ("reader", "reader_config")],
            &[("reader", "writer")],
        );
        assert_eq!(dag.depth_first_order(), vec!["reader", "writer"]);
    }

    #[test]
    fn test_dangling_destination() {
        let mut dag = build(&[("a", "reader_config")], &[]);
        let err = dag.add_edge("a", "ghost").unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDestination {
                node: "a".into(),
                destination: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_node() {
        let mut dag = build(&[("a", "reader_config")], &[]);
        assert!(matches!(
            dag.add_node("a", "writer_config"),
            Err(GraphError::DuplicateNode { .. })
        ));
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let dag = build(
            &[("a", "reader_config"), ("b", "writer_config")],
            &[("a", "b"), ("a", "b")],
        );
        assert_eq!(dag.edge_count(), 1);
        assert_eq!(dag.successors("a").unwrap(), vec!["b"]);
    }

    #[test]
    fn test_cycle_detected() {
        let dag = build(
            &[("a", "reader_config"), ("b", "pipeline_config"), ("c", "writer_config")],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        match dag.check_acyclic().unwrap_err() {
            GraphError::CycleDetected { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let dag = build(&[("a", "reader_config")], &[("a", "a")]);
        assert!(matches!(
            dag.check_acyclic(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_disconnected_components_listed() {
        let dag = build(
            &[
                ("r1", "reader_config"),
                ("w1", "writer_config"),
                ("r2", "reader_config"),
                ("w2", "writer_config"),
            ],
            &[("r1", "w1"), ("w2", "r2")],
        );
        match dag.check_connected().unwrap_err() {
            GraphError::DisconnectedGraph { components } => {
                assert_eq!(components, vec![vec!["r1", "w1"], vec!["r2", "w2"]]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_valid_dag_passes() {
        assert!(diamond().check_dag().is_ok());
    }

    #[test]
    fn test_neighbor_queries() {
        let dag = diamond();
        assert_eq!(dag.successors("a").unwrap(), vec!["b", "c"]);
        assert_eq!(dag.predecessors("d").unwrap(), vec!["b", "c"]);

        let typed = dag.predecessors_by_type("d").unwrap();
        assert_eq!(typed.get("b").map(String::as_str), Some("pipeline_config"));
        assert_eq!(typed.len(), 2);

        assert!(matches!(
            dag.predecessors("zzz"),
            Err(GraphError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let dag = diamond();

        let all: Vec<String> = dag.ancestors_of_type("d", None).unwrap().into_iter().collect();
        assert_eq!(all, vec!["a", "b", "c"]);

        let readers: Vec<String> = dag
            .ancestors_of_type("d", Some("reader_config"))
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(readers, vec!["a"]);

        let below: Vec<String> = dag.descendants("b").unwrap().into_iter().collect();
        assert_eq!(below, vec!["d"]);
        assert!(dag.descendants("d").unwrap().is_empty());
    }

    #[test]
    fn test_paths() {
        let dag = diamond();
        assert!(dag.has_path("a", "d").unwrap());
        assert!(!dag.has_path("d", "a").unwrap());

        let paths = dag.all_simple_paths("a", "d").unwrap().unwrap();
        assert_eq!(paths, vec![vec!["a", "b", "d"], vec!["a", "c", "d"]]);
        assert!(dag.all_simple_paths("b", "c").unwrap().is_none());
    }

    #[test]
    fn test_section_queries() {
        let dag = diamond();
        assert_eq!(dag.nodes_of_type("pipeline_config"), vec!["b", "c"]);
        assert_eq!(dag.section_of("d").unwrap(), "writer_config");
        assert_eq!(dag.starting_nodes(), vec!["a"]);
        assert_eq!(dag.node_names(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_dot_output() {
        let mut dag = diamond();
        dag.mark_conditional("a").unwrap();
        let sequence: Vec<String> = dag.depth_first_order();
        let dot = dag.to_dot(Some(&sequence));

        assert!(dot.starts_with("digraph dagflow {"));
        assert!(dot.contains("\"a\" [label=\"1: a\", shape=diamond"));
        assert!(dot.contains("\"b\" -> \"d\";"));
        assert!(dag.is_conditional("a"));
        assert!(!dag.is_conditional("b"));
    }

    fn long_chain(len: usize) -> ConfigurationDag {
        let mut dag = ConfigurationDag::new();
        for i in 0..len {
            dag.add_node(format!("n{i}"), "pipeline_config").unwrap();
        }
        for i in 1..len {
            dag.add_edge(&format!("n{}", i - 1), &format!("n{i}")).unwrap();
        }
        dag
    }

    #[test]
    fn test_long_chain_walks_do_not_recurse() {
        let dag = long_chain(20_000);

        assert!(dag.check_dag().is_ok());
        let order = dag.depth_first_order();
        assert_eq!(order.len(), 20_000);
        assert_eq!(order.first().map(String::as_str), Some("n0"));
        assert_eq!(order.last().map(String::as_str), Some("n19999"));
    }

    #[test]
    fn test_cycle_at_end_of_long_chain() {
        let mut dag = long_chain(10_000);
        dag.add_edge("n9999", "n9997").unwrap();

        let err = dag.check_acyclic().unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                cycle: vec!["n9997".into(), "n9998".into(), "n9999".into(), "n9997".into()],
            }
        );
    }
}
