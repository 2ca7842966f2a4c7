use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{Attributes, DType, GraphError, GraphStore, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Logical not of boolean features.
    Invert,
    Abs,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 2] = [UnaryOp::Invert, UnaryOp::Abs];

    pub fn key(self) -> &'static str {
        match self {
            UnaryOp::Invert => "INVERT",
            UnaryOp::Abs => "ABS",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }
}

pub struct UnaryOperator(pub UnaryOp);

impl OperatorKind for UnaryOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(self.0.key()).input("input").output("output")
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        match self.0 {
            UnaryOp::Invert => ensure_feature_dtypes(ctx, input, "BOOLEAN", |d| d == DType::Boolean),
            UnaryOp::Abs => ensure_feature_dtypes(ctx, input, "a numeric dtype", |d| d.is_numeric()),
        }
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let features = input.features().iter().map(|f| OutputFeature::created(f.name(), f.dtype())).collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    for op in UnaryOp::ALL {
        builder.register_operator(UnaryOperator(op))?;
    }
    Ok(())
}

pub fn invert(g: &mut GraphStore, input: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(UnaryOp::Invert.key(), &[("input", input)], Attributes::new())
}

pub fn abs(g: &mut GraphStore, input: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(UnaryOp::Abs.key(), &[("input", input)], Attributes::new())
}
