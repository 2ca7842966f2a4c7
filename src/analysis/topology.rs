use crate::store::{GraphStore, NodeId, OperatorId};
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

/// Result of walking a graph backwards from a set of nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Upstream {
    pub operators: BTreeSet<OperatorId>,
    pub nodes: BTreeSet<NodeId>,
    /// Reached nodes with no creator that are not stop nodes.
    pub leaves: BTreeSet<NodeId>,
    /// Stop nodes that were actually reached.
    pub reached_stops: BTreeSet<NodeId>,
}

/// Collects every operator and node an output depends on, stopping at `stop`.
///
/// The visited set makes this terminate on cyclic graphs too.
pub fn upstream_from(store: &GraphStore, start_nodes: &[NodeId], stop: &HashSet<NodeId>) -> Upstream {
    let mut out = Upstream::default();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if !visited.insert(node) {
            continue;
        }
        out.nodes.insert(node);
        if stop.contains(&node) {
            out.reached_stops.insert(node);
            continue;
        }
        let Some(creator) = store.node(node).and_then(|n| n.creator()) else {
            out.leaves.insert(node);
            continue;
        };
        if !out.operators.insert(creator) {
            continue;
        }
        if let Some(op) = store.operator(creator) {
            queue.extend(op.inputs().iter().map(|(_, n)| *n));
            // Sibling outputs belong to the slice as well.
            out.nodes.extend(op.outputs().iter().map(|(_, n)| *n));
        }
    }
    out
}

/// Operators reachable downstream of the given nodes.
pub fn downstream_from(store: &GraphStore, start_nodes: &[NodeId]) -> BTreeSet<OperatorId> {
    let mut visited_nodes = HashSet::new();
    let mut operators = BTreeSet::new();
    let mut queue = VecDeque::from(start_nodes.to_vec());

    while let Some(node) = queue.pop_front() {
        if !visited_nodes.insert(node) {
            continue;
        }
        for op in store.consumers(node) {
            if operators.insert(op) {
                if let Some(operator) = store.operator(op) {
                    queue.extend(operator.outputs().iter().map(|(_, n)| *n));
                }
            }
        }
    }
    operators
}

/// Operators lying on a dependency cycle, in id order.
///
/// `dependencies` maps each operator to the operators producing its inputs.
pub fn cycle_members(dependencies: &BTreeMap<OperatorId, BTreeSet<OperatorId>>) -> Vec<OperatorId> {
    let mut graph = DiGraph::<OperatorId, ()>::new();
    let mut index = BTreeMap::new();
    for &op in dependencies.keys() {
        index.insert(op, graph.add_node(op));
    }
    for (op, deps) in dependencies {
        for dep in deps {
            if let (Some(&from), Some(&to)) = (index.get(dep), index.get(op)) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let mut members: Vec<OperatorId> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1 || graph.contains_edge(component[0], component[0]))
        .flatten()
        .map(|idx| graph[idx])
        .collect();
    members.sort();
    members
}
