use crate::analysis::Schedule;
use crate::store::NodeId;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::trace;

/// Node -> data cache of one evaluation call.
///
/// Every value carries the number of schedule reads still ahead of it. Once
/// that count reaches zero the value is dropped, unless it is a requested
/// output.
#[derive(Debug)]
pub struct Ledger<D> {
    values: HashMap<NodeId, D>,
    pending_reads: HashMap<NodeId, usize>,
    retained: HashSet<NodeId>,
    evict: bool,
}

impl<D> Ledger<D> {
    pub fn new(schedule: &Schedule, evict: bool) -> Self {
        let mut pending_reads = HashMap::new();
        for input in schedule.steps.iter().flat_map(|s| &s.inputs) {
            *pending_reads.entry(input.node).or_insert(0) += 1;
        }
        Self { values: HashMap::new(), pending_reads, retained: schedule.outputs.iter().copied().collect(), evict }
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    pub fn get(&self, node: NodeId) -> Option<&D> {
        self.values.get(&node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.values.contains_key(&node)
    }

    pub fn insert(&mut self, node: NodeId, value: D) {
        if self.is_dead(node) {
            trace!(node = node.0, "dropping unread value");
            return;
        }
        self.values.insert(node, value);
    }

    /// Records that one scheduled read of `node` has happened.
    pub fn release(&mut self, node: NodeId) {
        if let Some(count) = self.pending_reads.get_mut(&node) {
            *count = count.saturating_sub(1);
        }
        if self.is_dead(node) && self.values.remove(&node).is_some() {
            trace!(node = node.0, "evicted");
        }
    }

    fn is_dead(&self, node: NodeId) -> bool {
        self.evict && !self.retained.contains(&node) && self.pending_reads.get(&node).copied().unwrap_or(0) == 0
    }

    /// Hands out the requested outputs. Returns the first missing node on failure.
    pub fn into_outputs(mut self, outputs: &[NodeId]) -> Result<BTreeMap<NodeId, D>, NodeId> {
        let mut result = BTreeMap::new();
        for &node in outputs {
            if result.contains_key(&node) {
                continue;
            }
            let value = self.values.remove(&node).ok_or(node)?;
            result.insert(node, value);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ScheduleStep, Source, StepInput};
    use crate::store::OperatorId;

    fn step(op: u32, reads: &[u32], writes: u32) -> ScheduleStep {
        ScheduleStep {
            operator: OperatorId(op),
            key: "ABS".into(),
            inputs: reads
                .iter()
                .map(|&n| StepInput { slot: "input".into(), node: NodeId(n), source: Source::Input })
                .collect(),
            outputs: vec![("output".into(), NodeId(writes))],
        }
    }

    // 0 -> [op0] -> 1 -> [op1] -> 2, and 1 read twice by op1
    fn schedule() -> Schedule {
        Schedule { steps: vec![step(0, &[0], 1), step(1, &[1, 1], 2)], inputs: vec![NodeId(0)], outputs: vec![NodeId(2)] }
    }

    #[test]
    fn test_evicts_after_last_read() {
        let mut ledger = Ledger::new(&schedule(), true);
        ledger.insert(NodeId(0), 10);
        ledger.release(NodeId(0));
        assert!(!ledger.contains(NodeId(0)));

        ledger.insert(NodeId(1), 11);
        ledger.release(NodeId(1));
        assert!(ledger.contains(NodeId(1)), "one read left");
        ledger.release(NodeId(1));
        assert!(!ledger.contains(NodeId(1)));

        ledger.insert(NodeId(2), 12);
        assert_eq!(ledger.into_outputs(&[NodeId(2)]).unwrap()[&NodeId(2)], 12);
    }

    #[test]
    fn test_retention_when_eviction_disabled() {
        let mut ledger = Ledger::new(&schedule(), false);
        ledger.insert(NodeId(0), 10);
        ledger.release(NodeId(0));
        assert_eq!(ledger.get(NodeId(0)), Some(&10));
    }

    #[test]
    fn test_unread_non_output_is_not_stored() {
        let mut ledger = Ledger::new(&schedule(), true);
        ledger.insert(NodeId(7), 1);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_missing_output_is_reported() {
        let ledger: Ledger<i32> = Ledger::new(&schedule(), true);
        assert_eq!(ledger.into_outputs(&[NodeId(2)]), Err(NodeId(2)));
    }
}
