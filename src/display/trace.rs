//! Plain-text renderings of schedules, processors and node lineage.
use crate::analysis::{Schedule, Source};
use crate::graph::Processor;
use crate::store::{EventSetNode, GraphStore, NodeId};
use std::collections::HashMap;
use std::fmt::Write;

fn schema(store: &GraphStore, node: &EventSetNode) -> String {
    let features: Vec<String> = node.features().iter().map(|f| format!("{}:{}", f.name(), f.dtype())).collect();
    let index: Vec<String> = store
        .sampling(node.sampling())
        .map(|s| s.index().iter().map(|l| format!("{}:{}", l.name, l.dtype)).collect())
        .unwrap_or_default();
    format!("[{}] index=[{}] sampling=#{}", features.join(", "), index.join(", "), node.sampling().0)
}

fn node_label(store: &GraphStore, id: NodeId) -> String {
    match store.node(id) {
        Some(node) => format!("#{} {}", id.0, node.name().unwrap_or("-")),
        None => format!("#{} <unknown>", id.0),
    }
}

/// One line per step in execution order, with the source of every input.
pub fn format_schedule(store: &GraphStore, schedule: &Schedule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "SCHEDULE ({} steps)", schedule.len());
    let _ = writeln!(out, "--------------------------------------------------");
    let inputs: Vec<String> = schedule.inputs.iter().map(|&n| node_label(store, n)).collect();
    let _ = writeln!(out, "inputs: {}", inputs.join(", "));

    for (i, step) in schedule.steps.iter().enumerate() {
        let operator = store.operator(step.operator).map(ToString::to_string).unwrap_or_else(|| step.key.clone());
        let _ = writeln!(out, "{:>3}. {} (op #{})", i, operator, step.operator.0);
        for input in &step.inputs {
            let source = match &input.source {
                Source::Input => "input".to_string(),
                Source::Operator { operator, slot } => format!("op #{}.{}", operator.0, slot),
            };
            let _ = writeln!(out, "     <- {} = {} ({})", input.slot, node_label(store, input.node), source);
        }
        for (slot, node) in &step.outputs {
            let _ = writeln!(out, "     -> {} = {}", slot, node_label(store, *node));
        }
    }

    let outputs: Vec<String> = schedule.outputs.iter().map(|&n| node_label(store, n)).collect();
    let _ = writeln!(out, "outputs: {}", outputs.join(", "));
    out
}

/// Named inputs and outputs with their schemas, then the slice summary.
pub fn format_processor(store: &GraphStore, processor: &Processor) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "PROCESSOR");
    let _ = writeln!(out, "--------------------------------------------------");
    for (title, entries) in [("inputs", processor.inputs()), ("outputs", processor.outputs())] {
        let _ = writeln!(out, "{}:", title);
        for (name, id) in entries {
            let described = store.node(*id).map(|n| schema(store, n)).unwrap_or_default();
            let _ = writeln!(out, "  {} = #{} {}", name, id.0, described);
        }
    }
    let keys: Vec<String> = processor
        .operators()
        .iter()
        .filter_map(|&op| store.operator(op).map(|o| format!("{}#{}", o.key(), op.0)))
        .collect();
    let _ = writeln!(out, "operators ({}): {}", keys.len(), keys.join(", "));
    let _ = writeln!(out, "nodes: {}, samplings: {}", processor.nodes().len(), processor.samplings().len());
    if !processor.unused_inputs().is_empty() {
        let unused: Vec<String> = processor.unused_inputs().iter().map(|&n| node_label(store, n)).collect();
        let _ = writeln!(out, "unused inputs: {}", unused.join(", "));
    }
    out
}

/// Upstream tree of `target`. Nodes already printed show a reference to the
/// level where they first appeared.
pub fn format_lineage(store: &GraphStore, target: NodeId) -> String {
    let mut tracer = Tracer { store, visited_at_level: HashMap::new(), output: String::new() };
    if store.node(target).is_some() {
        let _ = writeln!(tracer.output, "LINEAGE of {}:", store.describe_node(target));
        let _ = writeln!(tracer.output, "--------------------------------------------------");
        tracer.trace_node(target, 1, "", "");
    } else {
        let _ = writeln!(tracer.output, "Error: Invalid Node ID {:?}", target);
    }
    tracer.output
}

struct Tracer<'a> {
    store: &'a GraphStore,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, id: NodeId, level: usize, stem: &str, connector: &str) {
        let prefix = format!("{}{}", stem, connector);
        if let Some(&first_seen) = self.visited_at_level.get(&id) {
            let _ = writeln!(self.output, "{}-> (Ref to L{})", prefix, first_seen);
            return;
        }
        self.visited_at_level.insert(id, level);

        let Some(node) = self.store.node(id) else { return };
        let header = format!("[L{}] {} {}", level, node_label(self.store, id), schema(self.store, node));
        let Some(operator) = node.creator().and_then(|op| self.store.operator(op)) else {
            let _ = writeln!(self.output, "{}{} (input)", prefix, header);
            return;
        };
        let _ = writeln!(self.output, "{}{} = {}", prefix, header, operator);

        let child_stem = match connector.chars().next() {
            None => String::new(),
            Some('`') => format!("{}    ", stem),
            Some(_) => format!("{}|   ", stem),
        };
        let inputs = operator.inputs();
        for (i, (slot, child)) in inputs.iter().enumerate() {
            let branch = if i == inputs.len() - 1 { "`--" } else { "|--" };
            self.trace_node(*child, level + 1, &child_stem, &format!("{} {}: ", branch, slot));
        }
    }
}
