use crate::analysis::error::ScheduleError;
use crate::analysis::topology;
use crate::store::{GraphStore, NodeId, OperatorId, SamplingId};
use std::collections::{BTreeSet, HashSet};
use tracing::warn;

/// The slice of a graph between a set of declared inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    inputs: Vec<(String, NodeId)>,
    outputs: Vec<(String, NodeId)>,
    operators: BTreeSet<OperatorId>,
    nodes: BTreeSet<NodeId>,
    samplings: BTreeSet<SamplingId>,
    unused_inputs: Vec<NodeId>,
}

impl Processor {
    /// Slices the graph, naming inputs and outputs after their nodes or
    /// `input_{i}` / `output_{i}` when unnamed.
    pub fn infer(store: &GraphStore, inputs: &[NodeId], outputs: &[NodeId]) -> Result<Self, ScheduleError> {
        let name = |prefix: &str, i: usize, id: NodeId| {
            store.node(id).and_then(|n| n.name()).map(str::to_string).unwrap_or_else(|| format!("{}_{}", prefix, i))
        };
        let inputs = inputs.iter().enumerate().map(|(i, &id)| (name("input", i, id), id)).collect();
        let outputs = outputs.iter().enumerate().map(|(i, &id)| (name("output", i, id), id)).collect();
        Self::infer_named(store, inputs, outputs)
    }

    pub fn infer_named(
        store: &GraphStore,
        inputs: Vec<(String, NodeId)>,
        outputs: Vec<(String, NodeId)>,
    ) -> Result<Self, ScheduleError> {
        if let Some(&(_, unknown)) = inputs.iter().chain(&outputs).find(|(_, id)| store.node(*id).is_none()) {
            return Err(ScheduleError::UnknownNode(unknown));
        }

        let stop: HashSet<NodeId> = inputs.iter().map(|(_, id)| *id).collect();
        let output_ids: Vec<NodeId> = outputs.iter().map(|(_, id)| *id).collect();
        let upstream = topology::upstream_from(store, &output_ids, &stop);

        if !upstream.leaves.is_empty() {
            let nodes: Vec<NodeId> = upstream.leaves.iter().copied().collect();
            let names = nodes.iter().map(|&n| store.describe_node(n)).collect();
            return Err(ScheduleError::MissingInput { nodes, names });
        }

        let mut unused_inputs = Vec::new();
        for (name, id) in &inputs {
            if !upstream.reached_stops.contains(id) && !unused_inputs.contains(id) {
                warn!(input = %name, node = id.0, "declared input is not used by any output");
                unused_inputs.push(*id);
            }
        }

        let mut nodes = upstream.nodes;
        nodes.extend(stop.iter().copied());
        let samplings = nodes.iter().filter_map(|&n| store.node(n)).map(|n| n.sampling()).collect();

        Ok(Self { inputs, outputs, operators: upstream.operators, nodes, samplings, unused_inputs })
    }

    pub fn inputs(&self) -> &[(String, NodeId)] { &self.inputs }
    pub fn outputs(&self) -> &[(String, NodeId)] { &self.outputs }
    pub fn input_ids(&self) -> impl Iterator<Item = NodeId> + '_ { self.inputs.iter().map(|(_, n)| *n) }
    pub fn output_ids(&self) -> impl Iterator<Item = NodeId> + '_ { self.outputs.iter().map(|(_, n)| *n) }

    /// Operators on some path from an input to an output, in id order.
    pub fn operators(&self) -> &BTreeSet<OperatorId> { &self.operators }
    pub fn nodes(&self) -> &BTreeSet<NodeId> { &self.nodes }
    pub fn samplings(&self) -> &BTreeSet<SamplingId> { &self.samplings }

    /// Declared inputs no output depends on.
    pub fn unused_inputs(&self) -> &[NodeId] { &self.unused_inputs }

    pub fn input(&self, name: &str) -> Option<NodeId> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    pub fn output(&self, name: &str) -> Option<NodeId> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }

    /// Operators of this slice that `node` transitively depends on.
    pub fn ancestors(&self, store: &GraphStore, node: NodeId) -> BTreeSet<OperatorId> {
        let stop: HashSet<NodeId> = self.input_ids().collect();
        let up = topology::upstream_from(store, &[node], &stop);
        up.operators.intersection(&self.operators).copied().collect()
    }

    /// Operators of this slice that transitively depend on `node`.
    pub fn descendants(&self, store: &GraphStore, node: NodeId) -> BTreeSet<OperatorId> {
        topology::downstream_from(store, &[node]).intersection(&self.operators).copied().collect()
    }
}
