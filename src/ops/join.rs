use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{AttributeType, Attributes, GraphError, GraphStore, NodeId};

pub const JOIN: &str = "JOIN";

/// Left join on exact timestamps, and optionally on an integer feature `on`.
/// The output keeps the sampling of `left`.
pub struct JoinOperator;

impl OperatorKind for JoinOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(JOIN)
            .input("left")
            .input("right")
            .output("output")
            .optional_attribute("on", AttributeType::String)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let left = ctx.require_input("left")?;
        let right = ctx.require_input("right")?;
        ctx.ensure_same_index("left", "right")?;

        let on = ctx.attr_opt_str("on");
        if let Some(on) = on {
            for (slot, node) in [("left", left), ("right", right)] {
                let feature = node
                    .feature(on)
                    .ok_or_else(|| ctx.bad_attribute("on", format!("feature '{}' does not exist in {}", on, slot)))?;
                if !feature.dtype().is_integer() {
                    return Err(ctx.type_mismatch(format!(
                        "'on' feature '{}' must be an integer in {}, got {}",
                        on,
                        slot,
                        feature.dtype()
                    )));
                }
            }
        }

        for f in right.features().iter().filter(|f| Some(f.name()) != on) {
            if left.feature(f.name()).is_some() {
                return Err(ctx.invalid(format!("feature '{}' is defined in both inputs", f.name())));
            }
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let left = ctx.require_input("left")?;
        let right = ctx.require_input("right")?;
        let on = ctx.attr_opt_str("on");

        let features = left
            .features()
            .iter()
            .chain(right.features().iter().filter(|f| Some(f.name()) != on))
            .map(|f| OutputFeature::created(f.name(), f.dtype()))
            .collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("left"))])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    builder.register_operator(JoinOperator)?;
    Ok(())
}

pub fn join(g: &mut GraphStore, left: NodeId, right: NodeId, on: Option<&str>) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    if let Some(on) = on {
        attributes.insert("on".into(), on.into());
    }
    g.apply_single(JOIN, &[("left", left), ("right", right)], attributes)
}
