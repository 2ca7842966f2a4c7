//! Operators combining every feature of a node with a constant.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{AttributeType, AttributeValue, Attributes, DType, GraphError, GraphStore, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarOp {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Lt,
    Eq,
}

impl ScalarOp {
    pub const ALL: [ScalarOp; 7] = [
        ScalarOp::Add,
        ScalarOp::Sub,
        ScalarOp::Mul,
        ScalarOp::Div,
        ScalarOp::Gt,
        ScalarOp::Lt,
        ScalarOp::Eq,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ScalarOp::Add => "ADDITION_SCALAR",
            ScalarOp::Sub => "SUBTRACTION_SCALAR",
            ScalarOp::Mul => "MULTIPLICATION_SCALAR",
            ScalarOp::Div => "DIVISION_SCALAR",
            ScalarOp::Gt => "GREATER_SCALAR",
            ScalarOp::Lt => "LESS_SCALAR",
            ScalarOp::Eq => "EQUAL_SCALAR",
        }
    }

    pub fn is_relational(self) -> bool {
        matches!(self, ScalarOp::Gt | ScalarOp::Lt | ScalarOp::Eq)
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }
}

pub struct ScalarOperator(pub ScalarOp);

impl OperatorKind for ScalarOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(self.0.key())
            .input("input")
            .output("output")
            .attribute("value", AttributeType::Number)
            .attribute("is_value_first", AttributeType::Bool)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        ensure_feature_dtypes(ctx, input, "a numeric dtype", |d| d.is_numeric())?;

        if self.0 == ScalarOp::Div {
            ensure_feature_dtypes(ctx, input, "a float dtype", |d| d.is_float())?;
        }
        let value_is_float = matches!(ctx.attribute("value"), Some(AttributeValue::Float(_)));
        if value_is_float && !self.0.is_relational() {
            if let Some(f) = input.features().iter().find(|f| f.dtype().is_integer()) {
                return Err(ctx.type_mismatch(format!(
                    "feature '{}' has dtype {} and cannot be combined with a float value",
                    f.name(),
                    f.dtype()
                )));
            }
        }
        if let Some(AttributeValue::Integer(v)) = ctx.attribute("value") {
            let out_of_range = i32::try_from(*v).is_err();
            if out_of_range && !self.0.is_relational() {
                if let Some(f) = input.features().iter().find(|f| f.dtype() == DType::Int32) {
                    return Err(GraphError::InvalidAttribute {
                        operator: ctx.key().to_string(),
                        attribute: "value".into(),
                        message: format!("{} does not fit feature '{}' of dtype INT32", v, f.name()),
                    });
                }
            }
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let features = input
            .features()
            .iter()
            .map(|f| {
                let dtype = if self.0.is_relational() { DType::Boolean } else { f.dtype() };
                OutputFeature::created(f.name(), dtype)
            })
            .collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    for op in ScalarOp::ALL {
        builder.register_operator(ScalarOperator(op))?;
    }
    Ok(())
}

/// Applies `op` between `input` and `value`. With `is_value_first` the
/// constant is the left operand.
pub fn scalar(
    g: &mut GraphStore,
    op: ScalarOp,
    input: NodeId,
    value: impl Into<AttributeValue>,
    is_value_first: bool,
) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("value".into(), value.into());
    attributes.insert("is_value_first".into(), is_value_first.into());
    g.apply_single(op.key(), &[("input", input)], attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::standard_registry;
    use crate::store::InputSpec;
    use rstest::rstest;

    fn single(dtype: DType) -> (GraphStore, NodeId) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", dtype)).unwrap();
        (g, a)
    }

    #[rstest]
    #[case(ScalarOp::Add, DType::Int32, AttributeValue::Integer(2), DType::Int32)]
    #[case(ScalarOp::Mul, DType::Float32, AttributeValue::Float(0.5), DType::Float32)]
    #[case(ScalarOp::Gt, DType::Int64, AttributeValue::Float(0.5), DType::Boolean)]
    #[case(ScalarOp::Eq, DType::Float64, AttributeValue::Integer(1), DType::Boolean)]
    fn test_output_dtype(#[case] op: ScalarOp, #[case] input: DType, #[case] value: AttributeValue, #[case] expected: DType) {
        let (mut g, a) = single(input);
        let out = scalar(&mut g, op, a, value, false).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.features()[0].name(), "x");
        assert_eq!(node.features()[0].dtype(), expected);
        assert_eq!(node.sampling(), g.node(a).unwrap().sampling());
    }

    #[test]
    fn test_integer_feature_rejects_float_value() {
        let (mut g, a) = single(DType::Int64);
        let err = scalar(&mut g, ScalarOp::Add, a, 1.5, true).unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }

    #[rstest]
    #[case::overflows_int32(ScalarOp::Add, DType::Int32, 5_000_000_000, false)]
    #[case::int32_max(ScalarOp::Add, DType::Int32, i32::MAX as i64, true)]
    #[case::int64_holds_it(ScalarOp::Mul, DType::Int64, 5_000_000_000, true)]
    #[case::comparison_widens(ScalarOp::Gt, DType::Int32, 5_000_000_000, true)]
    fn test_integer_value_must_fit_feature(#[case] op: ScalarOp, #[case] input: DType, #[case] value: i64, #[case] ok: bool) {
        let (mut g, a) = single(input);
        match scalar(&mut g, op, a, value, false) {
            Ok(_) => assert!(ok),
            Err(GraphError::InvalidAttribute { attribute, message, .. }) => {
                assert!(!ok);
                assert_eq!(attribute, "value");
                assert!(message.contains("'x'"));
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_division_requires_float_features() {
        let (mut g, a) = single(DType::Int32);
        assert!(matches!(scalar(&mut g, ScalarOp::Div, a, 2, false), Err(GraphError::TypeMismatch { .. })));
    }

    #[test]
    fn test_missing_value_attribute() {
        let (mut g, a) = single(DType::Float64);
        let err = g.apply("ADDITION_SCALAR", &[("input", a)], Attributes::new()).unwrap_err();
        assert!(matches!(err, GraphError::InvalidAttribute { .. }));
    }
}
