//! Moving-window aggregations over `(t - window_length, t]`.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{AttributeType, Attributes, DType, GraphError, GraphStore, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowOp {
    SimpleMovingAverage,
    MovingSum,
    MovingCount,
    MovingStandardDeviation,
    MovingMin,
    MovingMax,
}

impl WindowOp {
    pub const ALL: [WindowOp; 6] = [
        WindowOp::SimpleMovingAverage,
        WindowOp::MovingSum,
        WindowOp::MovingCount,
        WindowOp::MovingStandardDeviation,
        WindowOp::MovingMin,
        WindowOp::MovingMax,
    ];

    pub fn key(self) -> &'static str {
        match self {
            WindowOp::SimpleMovingAverage => "SIMPLE_MOVING_AVERAGE",
            WindowOp::MovingSum => "MOVING_SUM",
            WindowOp::MovingCount => "MOVING_COUNT",
            WindowOp::MovingStandardDeviation => "MOVING_STANDARD_DEVIATION",
            WindowOp::MovingMin => "MOVING_MIN",
            WindowOp::MovingMax => "MOVING_MAX",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            WindowOp::SimpleMovingAverage => "sma",
            WindowOp::MovingSum => "moving_sum",
            WindowOp::MovingCount => "moving_count",
            WindowOp::MovingStandardDeviation => "moving_std",
            WindowOp::MovingMin => "moving_min",
            WindowOp::MovingMax => "moving_max",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.key() == key)
    }

    /// Output dtype for a feature of dtype `input`.
    pub fn output_dtype(self, input: DType) -> DType {
        match self {
            WindowOp::MovingCount => DType::Int32,
            WindowOp::SimpleMovingAverage | WindowOp::MovingStandardDeviation => match input {
                DType::Float32 => DType::Float32,
                _ => DType::Float64,
            },
            WindowOp::MovingSum | WindowOp::MovingMin | WindowOp::MovingMax => input,
        }
    }
}

pub struct WindowOperator(pub WindowOp);

impl OperatorKind for WindowOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(self.0.key())
            .input("input")
            .optional_input("sampling")
            .output("output")
            .attribute("window_length", AttributeType::Number)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        let window_length = ctx.attr_f64("window_length")?;
        if !(window_length.is_finite() && window_length > 0.0) {
            return Err(ctx.bad_attribute("window_length", format!("must be a positive duration, got {}", window_length)));
        }
        if self.0 != WindowOp::MovingCount {
            ensure_feature_dtypes(ctx, input, "a numeric dtype", |d| d.is_numeric())?;
        }
        if ctx.input("sampling").is_some() {
            ctx.ensure_same_index("input", "sampling")?;
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let features = input
            .features()
            .iter()
            .map(|f| OutputFeature::created(format!("{}_{}", self.0.prefix(), f.name()), self.0.output_dtype(f.dtype())))
            .collect();
        let sampling = if ctx.input("sampling").is_some() {
            OutputSampling::SameAs("sampling")
        } else {
            OutputSampling::SameAs("input")
        };
        Ok(vec![OutputSchema::new("output", features, sampling)])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    for op in WindowOp::ALL {
        builder.register_operator(WindowOperator(op))?;
    }
    Ok(())
}

/// Aggregates `input` over a trailing window, evaluated at the timestamps of
/// `sampling` when given, otherwise at the timestamps of `input`.
pub fn moving(
    g: &mut GraphStore,
    op: WindowOp,
    input: NodeId,
    window_length: f64,
    sampling: Option<NodeId>,
) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("window_length".into(), window_length.into());
    match sampling {
        Some(s) => g.apply_single(op.key(), &[("input", input), ("sampling", s)], attributes),
        None => g.apply_single(op.key(), &[("input", input)], attributes),
    }
}

pub fn simple_moving_average(g: &mut GraphStore, input: NodeId, window_length: f64) -> Result<NodeId, GraphError> {
    moving(g, WindowOp::SimpleMovingAverage, input, window_length, None)
}

pub fn moving_sum(g: &mut GraphStore, input: NodeId, window_length: f64) -> Result<NodeId, GraphError> {
    moving(g, WindowOp::MovingSum, input, window_length, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{filter, standard_registry};
    use crate::store::InputSpec;
    use rstest::rstest;

    #[rstest]
    #[case(WindowOp::SimpleMovingAverage, DType::Int64, DType::Float64)]
    #[case(WindowOp::SimpleMovingAverage, DType::Float32, DType::Float32)]
    #[case(WindowOp::MovingSum, DType::Int32, DType::Int32)]
    #[case(WindowOp::MovingCount, DType::Float64, DType::Int32)]
    #[case(WindowOp::MovingStandardDeviation, DType::Int32, DType::Float64)]
    #[case(WindowOp::MovingMax, DType::Float32, DType::Float32)]
    fn test_output_dtype(#[case] op: WindowOp, #[case] input: DType, #[case] expected: DType) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("v", input)).unwrap();
        let out = moving(&mut g, op, a, 5.0, None).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.features()[0].dtype(), expected);
        assert_eq!(node.features()[0].name(), format!("{}_v", op.prefix()));
        assert_eq!(node.sampling(), g.node(a).unwrap().sampling());
    }

    #[rstest]
    #[case(0.0)]
    #[case(-3.0)]
    #[case(f64::NAN)]
    fn test_window_length_must_be_positive(#[case] length: f64) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("v", DType::Float64)).unwrap();
        assert!(matches!(moving_sum(&mut g, a, length), Err(GraphError::InvalidAttribute { .. })));
    }

    #[test]
    fn test_sampling_input_drives_output_sampling() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("v", DType::Float64).feature("keep", DType::Boolean)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("ok", DType::Boolean).same_sampling_as(a)).unwrap();
        let filtered = filter(&mut g, a, b).unwrap();
        let out = moving(&mut g, WindowOp::MovingCount, a, 2.0, Some(filtered)).unwrap();
        assert_eq!(g.node(out).unwrap().sampling(), g.node(filtered).unwrap().sampling());
    }

    #[test]
    fn test_sampling_input_needs_same_index() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("v", DType::Float64).index("id", DType::Int64)).unwrap();
        let b = g.add_input(InputSpec::new("b").index("store", DType::String)).unwrap();
        let err = moving(&mut g, WindowOp::MovingSum, a, 2.0, Some(b)).unwrap_err();
        assert!(err.to_string().contains("same index"));
    }
}
