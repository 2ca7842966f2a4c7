//! Element-wise binary operators over two nodes sharing one sampling.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{Attributes, DType, GraphError, GraphStore, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 13] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::FloorDiv,
        BinaryOp::Mod,
        BinaryOp::Pow,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::Lt,
        BinaryOp::Le,
    ];

    pub fn key(self) -> &'static str {
        match self {
            BinaryOp::Add => "ADDITION",
            BinaryOp::Sub => "SUBTRACTION",
            BinaryOp::Mul => "MULTIPLICATION",
            BinaryOp::Div => "DIVISION",
            BinaryOp::FloorDiv => "FLOORDIV",
            BinaryOp::Mod => "MODULO",
            BinaryOp::Pow => "POWER",
            BinaryOp::Eq => "EQUAL",
            BinaryOp::Ne => "NOT_EQUAL",
            BinaryOp::Gt => "GREATER",
            BinaryOp::Ge => "GREATER_EQUAL",
            BinaryOp::Lt => "LESS",
            BinaryOp::Le => "LESS_EQUAL",
        }
    }

    /// Prefix of the generated output feature names.
    pub fn prefix(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mult",
            BinaryOp::Div => "div",
            BinaryOp::FloorDiv => "floordiv",
            BinaryOp::Mod => "mod",
            BinaryOp::Pow => "pow",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "neq",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
        }
    }

    pub fn is_relational(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }
}

pub struct BinaryOperator(pub BinaryOp);

impl OperatorKind for BinaryOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(self.0.key()).input("input_1").input("input_2").output("output")
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let left = ctx.require_input("input_1")?;
        let right = ctx.require_input("input_2")?;
        ctx.ensure_same_sampling("input_1", "input_2")?;
        ensure_matching_features(ctx, left, right)?;

        if !self.0.is_relational() {
            ensure_feature_dtypes(ctx, left, "a numeric dtype", |d| d.is_numeric())?;
        }
        if self.0 == BinaryOp::Div {
            ensure_feature_dtypes(ctx, left, "a float dtype (use FLOORDIV for integers)", |d| d.is_float())?;
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let left = ctx.require_input("input_1")?;
        let right = ctx.require_input("input_2")?;
        let features = left
            .features()
            .iter()
            .zip(right.features())
            .map(|(l, r)| {
                let dtype = if self.0.is_relational() { DType::Boolean } else { l.dtype() };
                OutputFeature::created(format!("{}_{}_{}", self.0.prefix(), l.name(), r.name()), dtype)
            })
            .collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input_1"))])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    for op in BinaryOp::ALL {
        builder.register_operator(BinaryOperator(op))?;
    }
    Ok(())
}

pub fn binary(g: &mut GraphStore, op: BinaryOp, input_1: NodeId, input_2: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(op.key(), &[("input_1", input_1), ("input_2", input_2)], Attributes::new())
}

pub fn add(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Add, a, b) }
pub fn subtract(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Sub, a, b) }
pub fn multiply(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Mul, a, b) }
pub fn divide(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Div, a, b) }
pub fn floordiv(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::FloorDiv, a, b) }
pub fn modulo(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Mod, a, b) }
pub fn power(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Pow, a, b) }
pub fn equal(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Eq, a, b) }
pub fn not_equal(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Ne, a, b) }
pub fn greater(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Gt, a, b) }
pub fn greater_equal(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Ge, a, b) }
pub fn less(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Lt, a, b) }
pub fn less_equal(g: &mut GraphStore, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> { binary(g, BinaryOp::Le, a, b) }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::standard_registry;
    use crate::store::InputSpec;
    use rstest::rstest;

    fn pair(dtype: DType) -> (GraphStore, NodeId, NodeId) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", dtype)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("y", dtype).same_sampling_as(a)).unwrap();
        (g, a, b)
    }

    #[rstest]
    #[case(BinaryOp::Add, DType::Float32, DType::Float32)]
    #[case(BinaryOp::Sub, DType::Int64, DType::Int64)]
    #[case(BinaryOp::Mul, DType::Int32, DType::Int32)]
    #[case(BinaryOp::Div, DType::Float64, DType::Float64)]
    #[case(BinaryOp::FloorDiv, DType::Int64, DType::Int64)]
    #[case(BinaryOp::Pow, DType::Float32, DType::Float32)]
    #[case(BinaryOp::Gt, DType::Float64, DType::Boolean)]
    #[case(BinaryOp::Eq, DType::String, DType::Boolean)]
    fn test_output_dtype(#[case] op: BinaryOp, #[case] input: DType, #[case] expected: DType) {
        let (mut g, a, b) = pair(input);
        let out = binary(&mut g, op, a, b).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.features().len(), 1);
        assert_eq!(node.features()[0].dtype(), expected);
        assert_eq!(node.features()[0].name(), format!("{}_x_y", op.prefix()));
    }

    #[test]
    fn test_sampling_is_propagated() {
        let (mut g, a, b) = pair(DType::Float64);
        let out = add(&mut g, a, b).unwrap();
        assert_eq!(g.node(out).unwrap().sampling(), g.node(a).unwrap().sampling());
        let op = g.node(out).unwrap().creator().unwrap();
        assert_eq!(g.node(out).unwrap().features()[0].creator(), Some(op));
    }

    #[test]
    fn test_independent_inputs_are_a_sampling_mismatch() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("y", DType::Float64)).unwrap();
        let err = add(&mut g, a, b).unwrap_err();
        assert!(matches!(err, GraphError::SamplingMismatch { .. }), "{err}");
        assert!(err.to_string().contains("'a'") && err.to_string().contains("'b'"));
    }

    #[test]
    fn test_feature_dtype_mismatch_names_features() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("y", DType::Int64).same_sampling_as(a)).unwrap();
        let err = add(&mut g, a, b).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert!(err.to_string().contains("'x'") && err.to_string().contains("'y'"));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64).feature("z", DType::Float64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("y", DType::Float64).same_sampling_as(a)).unwrap();
        assert!(matches!(add(&mut g, a, b), Err(GraphError::TypeMismatch { .. })));
    }

    #[rstest]
    #[case(BinaryOp::Div, DType::Int64)]
    #[case(BinaryOp::Add, DType::String)]
    #[case(BinaryOp::Mod, DType::Boolean)]
    fn test_rejected_dtypes(#[case] op: BinaryOp, #[case] dtype: DType) {
        let (mut g, a, b) = pair(dtype);
        assert!(matches!(binary(&mut g, op, a, b), Err(GraphError::TypeMismatch { .. })));
    }

    #[test]
    fn test_from_key_round_trips() {
        for op in BinaryOp::ALL {
            assert_eq!(BinaryOp::from_key(op.key()), Some(op));
        }
        assert_eq!(BinaryOp::from_key("ADDITION_SCALAR"), None);
    }
}
