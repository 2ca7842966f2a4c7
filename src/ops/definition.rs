//! Static operator metadata and the interface every operator variant implements.
use crate::store::{
    AttributeType, AttributeValue, Attributes, DType, EventSetNode, Feature, GraphError, GraphStore,
    IndexLevel, NodeId, Sampling,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDef {
    pub key: String,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub key: &'static str,
    pub ty: AttributeType,
    pub optional: bool,
}

/// Input slots, output slots and typed attributes of an operator key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorDef {
    pub key: &'static str,
    pub inputs: Vec<InputDef>,
    pub outputs: Vec<&'static str>,
    pub attributes: Vec<AttributeDef>,
}

impl OperatorDef {
    pub fn new(key: &'static str) -> Self {
        Self { key, inputs: Vec::new(), outputs: Vec::new(), attributes: Vec::new() }
    }

    pub fn input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(InputDef { key: key.into(), optional: false });
        self
    }

    pub fn optional_input(mut self, key: impl Into<String>) -> Self {
        self.inputs.push(InputDef { key: key.into(), optional: true });
        self
    }

    pub fn output(mut self, key: &'static str) -> Self {
        self.outputs.push(key);
        self
    }

    pub fn attribute(mut self, key: &'static str, ty: AttributeType) -> Self {
        self.attributes.push(AttributeDef { key, ty, optional: false });
        self
    }

    pub fn optional_attribute(mut self, key: &'static str, ty: AttributeType) -> Self {
        self.attributes.push(AttributeDef { key, ty, optional: true });
        self
    }

    pub fn input_def(&self, key: &str) -> Option<&InputDef> {
        self.inputs.iter().find(|i| i.key == key)
    }

    pub fn attribute_def(&self, key: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.key == key)
    }

    /// Checks slot names against the definition. Node ids are not inspected.
    pub(crate) fn check_inputs(&self, inputs: &[(String, NodeId)]) -> Result<(), GraphError> {
        let invalid = |message: String| GraphError::InvalidArguments { operator: self.key.to_string(), message };

        for (i, (slot, _)) in inputs.iter().enumerate() {
            if self.input_def(slot).is_none() {
                return Err(invalid(format!("unexpected input '{}'", slot)));
            }
            if inputs[..i].iter().any(|(s, _)| s == slot) {
                return Err(invalid(format!("input '{}' given twice", slot)));
            }
        }
        for def in self.inputs.iter().filter(|d| !d.optional) {
            if !inputs.iter().any(|(s, _)| *s == def.key) {
                return Err(invalid(format!("missing input '{}'", def.key)));
            }
        }
        Ok(())
    }

    pub(crate) fn check_attributes(&self, attributes: &Attributes) -> Result<(), GraphError> {
        let invalid = |attribute: &str, message: String| GraphError::InvalidAttribute {
            operator: self.key.to_string(),
            attribute: attribute.to_string(),
            message,
        };

        for (key, value) in attributes {
            let def = self.attribute_def(key).ok_or_else(|| invalid(key, "unexpected attribute".into()))?;
            if !value.conforms_to(def.ty) {
                return Err(invalid(key, format!("expected {:?}, got {}", def.ty, value.type_name())));
            }
        }
        for def in self.attributes.iter().filter(|d| !d.optional) {
            if !attributes.contains_key(def.key) {
                return Err(invalid(def.key, "missing attribute".into()));
            }
        }
        Ok(())
    }
}

/// Where an output node takes its sampling from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSampling {
    /// Identical (same `SamplingId`) to the sampling of this input slot.
    SameAs(&'static str),
    /// A fresh sampling created by the operator.
    New { index: Vec<IndexLevel>, is_unix_timestamp: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFeature {
    /// Computed by the operator, which becomes its creator.
    Created { name: String, dtype: DType },
    /// Passed through unchanged, keeping its original creator.
    Forwarded(Feature),
}

impl OutputFeature {
    pub fn created(name: impl Into<String>, dtype: DType) -> Self {
        OutputFeature::Created { name: name.into(), dtype }
    }

    pub fn name(&self) -> &str {
        match self {
            OutputFeature::Created { name, .. } => name,
            OutputFeature::Forwarded(f) => f.name(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            OutputFeature::Created { dtype, .. } => *dtype,
            OutputFeature::Forwarded(f) => f.dtype(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    pub slot: &'static str,
    pub features: Vec<OutputFeature>,
    pub sampling: OutputSampling,
}

impl OutputSchema {
    pub fn new(slot: &'static str, features: Vec<OutputFeature>, sampling: OutputSampling) -> Self {
        Self { slot, features, sampling }
    }
}

/// One operator variant. New operators are new implementations registered at
/// startup, never new branches in existing code.
pub trait OperatorKind: Send + Sync {
    fn definition(&self) -> OperatorDef;

    /// Sampling and dtype compatibility of the inputs.
    fn validate(&self, _ctx: &InferContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }

    /// Derives every output from the inputs and attributes. Only called after
    /// `validate` succeeded.
    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError>;
}

/// Read-only view handed to an operator while it is being constructed.
pub struct InferContext<'a> {
    pub(crate) store: &'a GraphStore,
    pub(crate) key: &'a str,
    pub(crate) inputs: &'a [(String, NodeId)],
    pub(crate) attributes: &'a Attributes,
}

impl<'a> InferContext<'a> {
    pub fn key(&self) -> &'a str { self.key }

    pub fn input(&self, slot: &str) -> Option<&'a EventSetNode> {
        let id = self.inputs.iter().find(|(s, _)| s == slot).map(|(_, n)| *n)?;
        self.store.node(id)
    }

    pub fn require_input(&self, slot: &str) -> Result<&'a EventSetNode, GraphError> {
        self.input(slot).ok_or_else(|| self.invalid(format!("missing input '{}'", slot)))
    }

    pub fn input_slots(&self) -> impl Iterator<Item = &'a str> {
        self.inputs.iter().map(|(s, _)| s.as_str())
    }

    pub fn sampling_of(&self, node: &EventSetNode) -> &'a Sampling {
        &self.store.samplings[node.sampling().index()]
    }

    /// Fails with `SamplingMismatch` unless both slots carry the same sampling identity.
    pub fn ensure_same_sampling(&self, left: &str, right: &str) -> Result<(), GraphError> {
        let l = self.require_input(left)?;
        let r = self.require_input(right)?;
        if l.sampling() == r.sampling() {
            return Ok(());
        }
        Err(GraphError::SamplingMismatch {
            operator: self.key.to_string(),
            left: self.describe(left, l),
            right: self.describe(right, r),
        })
    }

    /// Fails unless both slots have the same index level names and dtypes.
    pub fn ensure_same_index(&self, left: &str, right: &str) -> Result<(), GraphError> {
        let l = self.require_input(left)?;
        let r = self.require_input(right)?;
        let (li, ri) = (self.sampling_of(l).index(), self.sampling_of(r).index());
        if li == ri {
            return Ok(());
        }
        let names = |idx: &[IndexLevel]| idx.iter().map(|l| format!("{}:{}", l.name, l.dtype)).collect::<Vec<_>>();
        Err(self.invalid(format!(
            "{} and {} must have the same index, got {:?} and {:?}",
            self.describe(left, l),
            self.describe(right, r),
            names(li),
            names(ri)
        )))
    }

    pub fn attribute(&self, key: &str) -> Option<&'a AttributeValue> {
        self.attributes.get(key)
    }

    pub fn attr_f64(&self, key: &str) -> Result<f64, GraphError> {
        self.attribute(key).and_then(|v| v.as_f64()).ok_or_else(|| self.bad_attribute(key, "expected a number"))
    }

    pub fn attr_bool(&self, key: &str) -> Result<bool, GraphError> {
        self.attribute(key).and_then(|v| v.as_bool()).ok_or_else(|| self.bad_attribute(key, "expected a bool"))
    }

    pub fn attr_str(&self, key: &str) -> Result<&'a str, GraphError> {
        self.attribute(key).and_then(|v| v.as_str()).ok_or_else(|| self.bad_attribute(key, "expected a string"))
    }

    pub fn attr_opt_str(&self, key: &str) -> Option<&'a str> {
        self.attribute(key).and_then(|v| v.as_str())
    }

    pub fn attr_strings(&self, key: &str) -> Result<&'a [String], GraphError> {
        self.attribute(key)
            .and_then(|v| v.as_strings())
            .ok_or_else(|| self.bad_attribute(key, "expected a list of strings"))
    }

    pub fn type_mismatch(&self, message: impl Into<String>) -> GraphError {
        GraphError::TypeMismatch { operator: self.key.to_string(), message: message.into() }
    }

    pub fn invalid(&self, message: impl Into<String>) -> GraphError {
        GraphError::InvalidArguments { operator: self.key.to_string(), message: message.into() }
    }

    pub fn bad_attribute(&self, key: &str, message: impl Into<String>) -> GraphError {
        GraphError::InvalidAttribute {
            operator: self.key.to_string(),
            attribute: key.to_string(),
            message: message.into(),
        }
    }

    fn describe(&self, slot: &str, node: &EventSetNode) -> String {
        match node.name() {
            Some(name) => format!("'{}' (node '{}')", slot, name),
            None => format!("'{}' (features {:?})", slot, node.feature_names()),
        }
    }
}

/// Pairwise feature count and dtype check shared by binary operators.
pub(crate) fn ensure_matching_features(
    ctx: &InferContext<'_>,
    left: &EventSetNode,
    right: &EventSetNode,
) -> Result<(), GraphError> {
    if left.features().len() != right.features().len() {
        return Err(ctx.type_mismatch(format!(
            "inputs must have the same number of features, got {} ({:?}) and {} ({:?})",
            left.features().len(),
            left.feature_names(),
            right.features().len(),
            right.feature_names()
        )));
    }
    for (l, r) in left.features().iter().zip(right.features()) {
        if l.dtype() != r.dtype() {
            return Err(ctx.type_mismatch(format!(
                "feature '{}' ({}) and feature '{}' ({}) have different dtypes",
                l.name(),
                l.dtype(),
                r.name(),
                r.dtype()
            )));
        }
    }
    Ok(())
}

/// Fails unless every feature of `node` satisfies `accept`.
pub(crate) fn ensure_feature_dtypes(
    ctx: &InferContext<'_>,
    node: &EventSetNode,
    expected: &str,
    accept: impl Fn(DType) -> bool,
) -> Result<(), GraphError> {
    match node.features().iter().find(|f| !accept(f.dtype())) {
        Some(f) => Err(ctx.type_mismatch(format!(
            "feature '{}' has dtype {} but {} is required",
            f.name(),
            f.dtype(),
            expected
        ))),
        None => Ok(()),
    }
}
