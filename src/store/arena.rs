use super::error::GraphError;
use super::types::*;
use crate::ops::definition::{InferContext, OutputFeature, OutputSampling};
use crate::ops::registry::OperatorRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

const NO_EDGE: u32 = u32::MAX;

/// Columnar arena of samplings, nodes and operators.
///
/// Nodes and operators are only ever appended, so every id stays valid for the
/// lifetime of the store. Downstream edges (node -> consuming operators) are
/// kept as an intrusive linked list per node.
#[derive(Debug, Clone)]
pub struct GraphStore {
    operator_lib: Arc<OperatorRegistry>,

    pub(crate) samplings: Vec<Sampling>,
    pub(crate) nodes: Vec<EventSetNode>,
    pub(crate) operators: Vec<Operator>,

    // Downstream traversal helpers
    first_consumer: Vec<u32>,
    consumer_targets: Vec<OperatorId>,
    next_consumer: Vec<u32>,
}

enum PlannedSampling {
    Shared(SamplingId),
    New { index: Vec<IndexLevel>, is_unix_timestamp: bool },
}

struct PlannedOutput {
    slot: &'static str,
    features: Vec<OutputFeature>,
    sampling: PlannedSampling,
}

impl GraphStore {
    pub fn new(operator_lib: Arc<OperatorRegistry>) -> Self {
        Self {
            operator_lib,
            samplings: Vec::new(),
            nodes: Vec::new(),
            operators: Vec::new(),
            first_consumer: Vec::new(),
            consumer_targets: Vec::new(),
            next_consumer: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> { &self.operator_lib }

    pub fn node_count(&self) -> usize { self.nodes.len() }
    pub fn operator_count(&self) -> usize { self.operators.len() }
    pub fn sampling_count(&self) -> usize { self.samplings.len() }

    pub fn node(&self, id: NodeId) -> Option<&EventSetNode> { self.nodes.get(id.index()) }
    pub fn operator(&self, id: OperatorId) -> Option<&Operator> { self.operators.get(id.index()) }
    pub fn sampling(&self, id: SamplingId) -> Option<&Sampling> { self.samplings.get(id.index()) }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> { (0..self.nodes.len()).map(NodeId::new) }
    pub fn operator_ids(&self) -> impl Iterator<Item = OperatorId> { (0..self.operators.len()).map(OperatorId::new) }

    /// Sampling of a node, resolved through the arena.
    pub fn sampling_of(&self, node: NodeId) -> Option<&Sampling> {
        self.node(node).and_then(|n| self.sampling(n.sampling))
    }

    /// Display label of a node: its name, or its feature list.
    pub fn describe_node(&self, id: NodeId) -> String {
        match self.node(id) {
            Some(node) => match node.name() {
                Some(name) => format!("'{}'", name),
                None => format!("node #{} {:?}", id.0, node.feature_names()),
            },
            None => format!("node #{} (unknown)", id.0),
        }
    }

    /// Operators reading `node`, most recently added first.
    pub fn consumers(&self, node: NodeId) -> Consumers<'_> {
        let head = self.first_consumer.get(node.index()).copied().unwrap_or(NO_EDGE);
        Consumers { store: self, edge: head }
    }

    /// Declares a graph input node.
    pub fn add_input(&mut self, spec: InputSpec) -> Result<NodeId, GraphError> {
        let invalid = |message: String| GraphError::InvalidArguments { operator: "input".into(), message };
        let names = || spec.features.iter().map(|(name, _)| name.as_str());

        let sampling = match spec.same_sampling_as {
            Some(other) => {
                let other = self.node(other).ok_or(GraphError::UnknownNode(other))?;
                let shared = &self.samplings[other.sampling.index()];
                if !spec.index.is_empty() && spec.index != shared.index {
                    return Err(invalid(format!(
                        "index {:?} differs from the index of the shared sampling {:?}",
                        spec.index.iter().map(|l| &l.name).collect::<Vec<_>>(),
                        shared.index_names().collect::<Vec<_>>()
                    )));
                }
                check_source_columns(names(), &shared.index)?;
                other.sampling
            }
            None => {
                check_source_columns(names(), &spec.index)?;
                self.declare_sampling(spec.index, spec.is_unix_timestamp, None)
            }
        };

        let features = spec
            .features
            .into_iter()
            .map(|(name, dtype)| Feature { name, dtype, creator: None })
            .collect();
        Ok(self.declare_node(spec.name, features, sampling, None))
    }

    /// Instantiates a registered operator over existing nodes and appends its outputs.
    pub fn apply(
        &mut self,
        key: &str,
        inputs: &[(&str, NodeId)],
        attributes: Attributes,
    ) -> Result<OperatorId, GraphError> {
        let inputs: Vec<(String, NodeId)> = inputs.iter().map(|(s, n)| (s.to_string(), *n)).collect();
        self.instantiate(key, inputs, attributes, None)
    }

    /// `apply` for operators with a single `output` slot.
    pub fn apply_single(
        &mut self,
        key: &str,
        inputs: &[(&str, NodeId)],
        attributes: Attributes,
    ) -> Result<NodeId, GraphError> {
        let op = self.apply(key, inputs, attributes)?;
        self.output_of(op, "output").ok_or_else(|| GraphError::OutputMismatch {
            operator: key.to_string(),
            slot: "output".into(),
            message: "operator has no such output".into(),
        })
    }

    pub fn output_of(&self, op: OperatorId, slot: &str) -> Option<NodeId> {
        self.operator(op).and_then(|o| o.output(slot))
    }

    pub(crate) fn declare_sampling(
        &mut self,
        index: Vec<IndexLevel>,
        is_unix_timestamp: bool,
        creator: Option<OperatorId>,
    ) -> SamplingId {
        let id = SamplingId::new(self.samplings.len());
        self.samplings.push(Sampling { index, is_unix_timestamp, creator });
        id
    }

    pub(crate) fn declare_node(
        &mut self,
        name: Option<String>,
        features: Vec<Feature>,
        sampling: SamplingId,
        creator: Option<OperatorId>,
    ) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(EventSetNode { name, features, sampling, creator });
        self.first_consumer.push(NO_EDGE);
        id
    }

    /// Binds an operator to output nodes that were declared up front.
    ///
    /// The operator is validated exactly like `apply`, then its inferred
    /// outputs must match the declared nodes. Used when loading a graph whose
    /// nodes are known before their creators.
    pub(crate) fn bind_operator(
        &mut self,
        key: &str,
        inputs: Vec<(String, NodeId)>,
        attributes: Attributes,
        outputs: &[(String, NodeId)],
    ) -> Result<OperatorId, GraphError> {
        self.instantiate(key, inputs, attributes, Some(outputs))
    }

    fn instantiate(
        &mut self,
        key: &str,
        inputs: Vec<(String, NodeId)>,
        attributes: Attributes,
        declared: Option<&[(String, NodeId)]>,
    ) -> Result<OperatorId, GraphError> {
        let lib = Arc::clone(&self.operator_lib);
        let kind = lib.get(key).ok_or_else(|| GraphError::UnknownOperator(key.to_string()))?;
        let definition = lib.definition(key).ok_or_else(|| GraphError::UnknownOperator(key.to_string()))?;

        definition.check_inputs(&inputs)?;
        definition.check_attributes(&attributes)?;
        if let Some(&(_, missing)) = inputs.iter().find(|(_, n)| n.index() >= self.nodes.len()) {
            return Err(GraphError::UnknownNode(missing));
        }

        let planned = {
            let ctx = InferContext { store: self, key, inputs: &inputs, attributes: &attributes };
            kind.validate(&ctx)?;
            let schemas = kind.output_schema(&ctx)?;

            let mut planned = Vec::with_capacity(schemas.len());
            for schema in schemas {
                if !definition.outputs.contains(&schema.slot) {
                    return Err(GraphError::OutputMismatch {
                        operator: key.to_string(),
                        slot: schema.slot.to_string(),
                        message: "slot is not declared by the operator definition".into(),
                    });
                }
                let mut names = HashSet::new();
                if let Some(dup) = schema.features.iter().find(|f| !names.insert(f.name().to_string())) {
                    return Err(GraphError::InvalidArguments {
                        operator: key.to_string(),
                        message: format!("output feature name '{}' is produced twice", dup.name()),
                    });
                }
                let sampling = match schema.sampling {
                    OutputSampling::SameAs(slot) => PlannedSampling::Shared(ctx.require_input(slot)?.sampling),
                    OutputSampling::New { index, is_unix_timestamp } => PlannedSampling::New { index, is_unix_timestamp },
                };
                planned.push(PlannedOutput { slot: schema.slot, features: schema.features, sampling });
            }
            planned
        };

        let op_id = OperatorId::new(self.operators.len());
        let outputs = match declared {
            None => self.create_outputs(op_id, planned),
            Some(declared) => self.check_declared_outputs(key, op_id, planned, declared)?,
        };

        for (_, node) in &inputs {
            let edge = self.consumer_targets.len() as u32;
            self.consumer_targets.push(op_id);
            self.next_consumer.push(self.first_consumer[node.index()]);
            self.first_consumer[node.index()] = edge;
        }

        debug!(operator = key, id = op_id.0, outputs = ?outputs.iter().map(|(_, n)| n.0).collect::<Vec<_>>(), "operator added");
        self.operators.push(Operator { key: key.to_string(), inputs: inputs.into_iter().collect(), outputs, attributes });
        Ok(op_id)
    }

    fn resolve_features(op: OperatorId, features: Vec<OutputFeature>) -> Vec<Feature> {
        features
            .into_iter()
            .map(|f| match f {
                OutputFeature::Created { name, dtype } => Feature { name, dtype, creator: Some(op) },
                OutputFeature::Forwarded(feature) => feature,
            })
            .collect()
    }

    fn create_outputs(&mut self, op: OperatorId, planned: Vec<PlannedOutput>) -> SlotMap {
        let mut outputs = SlotMap::new();
        for out in planned {
            let sampling = match out.sampling {
                PlannedSampling::Shared(id) => id,
                PlannedSampling::New { index, is_unix_timestamp } => self.declare_sampling(index, is_unix_timestamp, Some(op)),
            };
            let features = Self::resolve_features(op, out.features);
            let node = self.declare_node(None, features, sampling, Some(op));
            outputs.push((out.slot.to_string(), node));
        }
        outputs
    }

    fn check_declared_outputs(
        &mut self,
        key: &str,
        op: OperatorId,
        planned: Vec<PlannedOutput>,
        declared: &[(String, NodeId)],
    ) -> Result<SlotMap, GraphError> {
        let mismatch = |slot: &str, message: String| GraphError::OutputMismatch {
            operator: key.to_string(),
            slot: slot.to_string(),
            message,
        };

        if declared.len() != planned.len() {
            return Err(mismatch("*", format!("expected {} outputs, got {}", planned.len(), declared.len())));
        }

        let mut outputs = SlotMap::new();
        for out in planned {
            let &(_, node_id) = declared
                .iter()
                .find(|(s, _)| s == out.slot)
                .ok_or_else(|| mismatch(out.slot, "output is not declared".into()))?;
            let node = self.nodes.get(node_id.index()).ok_or(GraphError::UnknownNode(node_id))?;

            if node.creator != Some(op) {
                return Err(mismatch(out.slot, format!("node #{} is not created by this operator", node_id.0)));
            }
            let declared_schema: Vec<(&str, DType)> = node.features.iter().map(|f| (f.name.as_str(), f.dtype)).collect();
            let inferred_schema: Vec<(&str, DType)> = out.features.iter().map(|f| (f.name(), f.dtype())).collect();
            if declared_schema != inferred_schema {
                return Err(mismatch(out.slot, format!("declared features {:?}, inferred {:?}", declared_schema, inferred_schema)));
            }

            let sampling = &self.samplings[node.sampling.index()];
            match &out.sampling {
                PlannedSampling::Shared(expected) if *expected != node.sampling => {
                    return Err(mismatch(out.slot, "output must share the sampling of its input".into()));
                }
                PlannedSampling::New { index, is_unix_timestamp } => {
                    if sampling.creator != Some(op) {
                        return Err(mismatch(out.slot, "output must have a new sampling created by this operator".into()));
                    }
                    if sampling.index != *index || sampling.is_unix_timestamp != *is_unix_timestamp {
                        return Err(mismatch(out.slot, "declared sampling does not match the inferred index".into()));
                    }
                }
                _ => {}
            }

            self.nodes[node_id.index()].features = Self::resolve_features(op, out.features);
            outputs.push((out.slot.to_string(), node_id));
        }
        Ok(outputs)
    }
}

/// Column rules of a node with no creator: unique feature names, and index
/// levels of an index dtype that collide with no other column.
pub(crate) fn check_source_columns<'a>(
    features: impl IntoIterator<Item = &'a str>,
    index: &[IndexLevel],
) -> Result<(), GraphError> {
    let invalid = |message: String| GraphError::InvalidArguments { operator: "input".into(), message };

    let mut seen = HashSet::new();
    for name in features {
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate feature name '{}'", name)));
        }
    }
    for level in index {
        if !level.dtype.is_index_compatible() {
            return Err(invalid(format!("index '{}' has unsupported dtype {}", level.name, level.dtype)));
        }
        if !seen.insert(level.name.as_str()) {
            return Err(invalid(format!("index '{}' collides with another column", level.name)));
        }
    }
    Ok(())
}

/// Iterator over the linked consumer list of one node.
pub struct Consumers<'a> {
    store: &'a GraphStore,
    edge: u32,
}

impl Iterator for Consumers<'_> {
    type Item = OperatorId;

    fn next(&mut self) -> Option<OperatorId> {
        if self.edge == NO_EDGE {
            return None;
        }
        let idx = self.edge as usize;
        self.edge = self.store.next_consumer[idx];
        Some(self.store.consumer_targets[idx])
    }
}
