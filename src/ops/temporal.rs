//! Operators acting on the timestamps themselves.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{AttributeType, Attributes, DType, GraphError, GraphStore, NodeId};

pub const LAG: &str = "LAG";
pub const TIMESTAMPS: &str = "TIMESTAMPS";
pub const UNIQUE_TIMESTAMPS: &str = "UNIQUE_TIMESTAMPS";

fn new_sampling_like(ctx: &InferContext<'_>, slot: &str) -> Result<OutputSampling, GraphError> {
    let sampling = ctx.sampling_of(ctx.require_input(slot)?);
    Ok(OutputSampling::New { index: sampling.index().to_vec(), is_unix_timestamp: sampling.is_unix_timestamp() })
}

/// Shifts every timestamp forward by `duration`.
pub struct LagOperator;

impl OperatorKind for LagOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(LAG).input("input").output("output").attribute("duration", AttributeType::Number)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let duration = ctx.attr_f64("duration")?;
        if !duration.is_finite() || duration == 0.0 {
            return Err(ctx.bad_attribute("duration", format!("must be a finite non-zero duration, got {}", duration)));
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let features = input.features().iter().map(|f| OutputFeature::created(f.name(), f.dtype())).collect();
        Ok(vec![OutputSchema::new("output", features, new_sampling_like(ctx, "input")?)])
    }
}

/// Exposes the timestamps as a float64 feature.
pub struct TimestampsOperator;

impl OperatorKind for TimestampsOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(TIMESTAMPS).input("input").output("output")
    }

    fn output_schema(&self, _ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let features = vec![OutputFeature::created("timestamps", DType::Float64)];
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

/// Deduplicated timestamps, without features.
pub struct UniqueTimestampsOperator;

impl OperatorKind for UniqueTimestampsOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(UNIQUE_TIMESTAMPS).input("input").output("output")
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        Ok(vec![OutputSchema::new("output", Vec::new(), new_sampling_like(ctx, "input")?)])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    builder
        .register_operator(LagOperator)?
        .register_operator(TimestampsOperator)?
        .register_operator(UniqueTimestampsOperator)?;
    Ok(())
}

pub fn lag(g: &mut GraphStore, input: NodeId, duration: f64) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("duration".into(), duration.into());
    g.apply_single(LAG, &[("input", input)], attributes)
}

pub fn timestamps(g: &mut GraphStore, input: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(TIMESTAMPS, &[("input", input)], Attributes::new())
}

pub fn unique_timestamps(g: &mut GraphStore, input: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(UNIQUE_TIMESTAMPS, &[("input", input)], Attributes::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::standard_registry;
    use crate::store::InputSpec;

    fn setup() -> (GraphStore, NodeId) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("v", DType::Int64).unix_timestamps(true)).unwrap();
        (g, a)
    }

    #[test]
    fn test_lag_changes_sampling() {
        let (mut g, a) = setup();
        let out = lag(&mut g, a, 60.0).unwrap();
        let node = g.node(out).unwrap();
        assert_ne!(node.sampling(), g.node(a).unwrap().sampling());
        assert!(g.sampling(node.sampling()).unwrap().is_unix_timestamp());
        assert!(lag(&mut g, a, 0.0).is_err());
    }

    #[test]
    fn test_timestamps_keeps_sampling() {
        let (mut g, a) = setup();
        let out = timestamps(&mut g, a).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.sampling(), g.node(a).unwrap().sampling());
        assert_eq!(node.features()[0].dtype(), DType::Float64);
    }

    #[test]
    fn test_unique_timestamps_drops_features() {
        let (mut g, a) = setup();
        let out = unique_timestamps(&mut g, a).unwrap();
        let node = g.node(out).unwrap();
        assert!(node.features().is_empty());
        assert_ne!(node.sampling(), g.node(a).unwrap().sampling());
    }
}
