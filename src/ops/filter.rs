use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{Attributes, DType, GraphError, GraphStore, NodeId};

pub const FILTER: &str = "FILTER";

/// Keeps the events of `input` where the single boolean feature of
/// `condition` is true. The surviving timestamps form a new sampling.
pub struct FilterOperator;

impl OperatorKind for FilterOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(FILTER).input("input").input("condition").output("output")
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let condition = ctx.require_input("condition")?;
        match condition.features() {
            [f] if f.dtype() == DType::Boolean => {}
            [f] => {
                return Err(ctx.type_mismatch(format!(
                    "condition feature '{}' has dtype {} but BOOLEAN is required",
                    f.name(),
                    f.dtype()
                )))
            }
            other => {
                return Err(ctx.type_mismatch(format!(
                    "condition must have exactly one feature, got {:?}",
                    other.iter().map(|f| f.name()).collect::<Vec<_>>()
                )))
            }
        }
        ctx.ensure_same_sampling("input", "condition")
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let sampling = ctx.sampling_of(input);
        let features = input.features().iter().map(|f| OutputFeature::created(f.name(), f.dtype())).collect();
        Ok(vec![OutputSchema::new(
            "output",
            features,
            OutputSampling::New { index: sampling.index().to_vec(), is_unix_timestamp: sampling.is_unix_timestamp() },
        )])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    builder.register_operator(FilterOperator)?;
    Ok(())
}

pub fn filter(g: &mut GraphStore, input: NodeId, condition: NodeId) -> Result<NodeId, GraphError> {
    g.apply_single(FILTER, &[("input", input), ("condition", condition)], Attributes::new())
}
