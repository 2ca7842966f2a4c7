use super::error::ScheduleError;
use super::topology::cycle_members;
use crate::graph::Processor;
use crate::store::{GraphStore, NodeId, OperatorId};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Where a step reads one of its inputs from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Source {
    /// Data supplied by the caller for a declared input.
    Input,
    /// Output `slot` of an earlier step.
    Operator { operator: OperatorId, slot: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInput {
    pub slot: String,
    pub node: NodeId,
    pub source: Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleStep {
    pub operator: OperatorId,
    pub key: String,
    pub inputs: Vec<StepInput>,
    pub outputs: Vec<(String, NodeId)>,
}

/// Dependency-respecting linear order of operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub steps: Vec<ScheduleStep>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
}

impl Schedule {
    pub fn operators(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.steps.iter().map(|s| s.operator)
    }

    pub fn position(&self, operator: OperatorId) -> Option<usize> {
        self.steps.iter().position(|s| s.operator == operator)
    }

    pub fn len(&self) -> usize { self.steps.len() }
    pub fn is_empty(&self) -> bool { self.steps.is_empty() }
}

/// Orders the operators needed to compute `outputs` from `inputs`.
pub fn build_schedule(store: &GraphStore, inputs: &[NodeId], outputs: &[NodeId]) -> Result<Schedule, ScheduleError> {
    let processor = Processor::infer(store, inputs, outputs)?;
    schedule_processor(store, &processor)
}

/// Kahn's algorithm over the processor's operators. Among ready operators the
/// lowest id, which is declaration order, runs first.
pub fn schedule_processor(store: &GraphStore, processor: &Processor) -> Result<Schedule, ScheduleError> {
    let inputs: HashSet<NodeId> = processor.input_ids().collect();

    // 1. Producer of every consumed node, and the dependency sets
    let mut dependencies: BTreeMap<OperatorId, BTreeSet<OperatorId>> = BTreeMap::new();
    let mut steps: BTreeMap<OperatorId, ScheduleStep> = BTreeMap::new();
    for &op_id in processor.operators() {
        let Some(op) = store.operator(op_id) else { continue };
        let mut deps = BTreeSet::new();
        let mut step_inputs = Vec::with_capacity(op.inputs().len());

        for (slot, node) in op.inputs() {
            let node_def = store.node(*node).ok_or(ScheduleError::UnknownNode(*node))?;
            let source = match node_def.creator() {
                _ if inputs.contains(node) => Source::Input,
                Some(producer) => {
                    let out_slot = store
                        .operator(producer)
                        .and_then(|p| p.outputs().iter().find(|(_, n)| n == node))
                        .map(|(s, _)| s.clone())
                        .unwrap_or_default();
                    deps.insert(producer);
                    Source::Operator { operator: producer, slot: out_slot }
                }
                None => {
                    return Err(ScheduleError::MissingInput {
                        nodes: vec![*node],
                        names: vec![store.describe_node(*node)],
                    })
                }
            };
            step_inputs.push(StepInput { slot: slot.clone(), node: *node, source });
        }

        dependencies.insert(op_id, deps);
        steps.insert(
            op_id,
            ScheduleStep { operator: op_id, key: op.key().to_string(), inputs: step_inputs, outputs: op.outputs().to_vec() },
        );
    }

    // 2. In-degrees and reverse edges
    let mut in_degree: BTreeMap<OperatorId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<OperatorId, Vec<OperatorId>> = BTreeMap::new();
    for (&op, deps) in &dependencies {
        in_degree.insert(op, deps.len());
        for &dep in deps {
            dependents.entry(dep).or_default().push(op);
        }
    }

    // 3. Process ready set
    let mut ready: BTreeSet<OperatorId> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&op, _)| op).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(op) = ready.pop_first() {
        order.push(op);
        for &child in dependents.get(&op).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(&child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() != steps.len() {
        let emitted: HashSet<OperatorId> = order.iter().copied().collect();
        let remaining: BTreeMap<OperatorId, BTreeSet<OperatorId>> =
            dependencies.into_iter().filter(|(op, _)| !emitted.contains(op)).collect();
        let mut operators = cycle_members(&remaining);
        if operators.is_empty() {
            operators = remaining.keys().copied().collect();
        }
        let labels = operators
            .iter()
            .map(|op| format!("{}#{}", steps.get(op).map(|s| s.key.as_str()).unwrap_or("?"), op.0))
            .collect();
        return Err(ScheduleError::CyclicGraph { operators, labels });
    }

    let steps: Vec<ScheduleStep> = order.into_iter().filter_map(|op| steps.remove(&op)).collect();
    debug!(steps = steps.len(), "schedule built");
    Ok(Schedule { steps, inputs: processor.input_ids().collect(), outputs: processor.output_ids().collect() })
}
