//! Feature selection, renaming, concatenation and casting.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{AttributeType, Attributes, DType, GraphError, GraphStore, NodeId};
use std::collections::HashSet;

pub const SELECT: &str = "SELECT";
pub const PREFIX: &str = "PREFIX";
pub const GLUE: &str = "GLUE";
pub const CAST: &str = "CAST";

/// Maximum number of nodes a single GLUE can concatenate.
pub const MAX_GLUE_INPUTS: usize = 16;

pub fn glue_slot(i: usize) -> String {
    format!("input_{}", i)
}

pub struct SelectOperator;

impl OperatorKind for SelectOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(SELECT).input("input").output("output").attribute("feature_names", AttributeType::StringList)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        let mut seen = HashSet::new();
        for name in ctx.attr_strings("feature_names")? {
            if input.feature(name).is_none() {
                return Err(ctx.bad_attribute(
                    "feature_names",
                    format!("feature '{}' does not exist, available: {:?}", name, input.feature_names()),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(ctx.bad_attribute("feature_names", format!("feature '{}' selected twice", name)));
            }
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let features = ctx
            .attr_strings("feature_names")?
            .iter()
            .filter_map(|name| input.feature(name))
            .map(|f| OutputFeature::Forwarded(f.clone()))
            .collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

pub struct PrefixOperator;

impl OperatorKind for PrefixOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(PREFIX).input("input").output("output").attribute("prefix", AttributeType::String)
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let prefix = ctx.attr_str("prefix")?;
        let features = input
            .features()
            .iter()
            .map(|f| OutputFeature::created(format!("{}{}", prefix, f.name()), f.dtype()))
            .collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

/// Concatenates the features of nodes sharing one sampling.
pub struct GlueOperator;

impl GlueOperator {
    fn slots(ctx: &InferContext<'_>) -> Vec<String> {
        (0..MAX_GLUE_INPUTS).map(glue_slot).take_while(|s| ctx.input(s).is_some()).collect()
    }
}

impl OperatorKind for GlueOperator {
    fn definition(&self) -> OperatorDef {
        (0..MAX_GLUE_INPUTS).fold(OperatorDef::new(GLUE).output("output"), |def, i| {
            if i < 2 {
                def.input(glue_slot(i))
            } else {
                def.optional_input(glue_slot(i))
            }
        })
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let slots = Self::slots(ctx);
        if slots.len() != ctx.input_slots().count() {
            return Err(ctx.invalid(format!("inputs must be contiguous from input_0, got {:?}", ctx.input_slots().collect::<Vec<_>>())));
        }

        let mut seen = HashSet::new();
        for slot in &slots {
            ctx.ensure_same_sampling("input_0", slot)?;
            for f in ctx.require_input(slot)?.features() {
                if !seen.insert(f.name()) {
                    return Err(ctx.invalid(format!("feature '{}' appears in more than one input", f.name())));
                }
            }
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let mut features = Vec::new();
        for slot in Self::slots(ctx) {
            features.extend(ctx.require_input(&slot)?.features().iter().cloned().map(OutputFeature::Forwarded));
        }
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input_0"))])
    }
}

pub struct CastOperator;

impl OperatorKind for CastOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(CAST).input("input").output("output").attribute("dtype", AttributeType::String)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let name = ctx.attr_str("dtype")?;
        if DType::from_name(name).is_none() {
            return Err(ctx.bad_attribute("dtype", format!("unknown dtype '{}'", name)));
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let target = DType::from_name(ctx.attr_str("dtype")?)
            .ok_or_else(|| ctx.bad_attribute("dtype", "unknown dtype"))?;
        let features = input.features().iter().map(|f| OutputFeature::created(f.name(), target)).collect();
        Ok(vec![OutputSchema::new("output", features, OutputSampling::SameAs("input"))])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    builder
        .register_operator(SelectOperator)?
        .register_operator(PrefixOperator)?
        .register_operator(GlueOperator)?
        .register_operator(CastOperator)?;
    Ok(())
}

pub fn select(g: &mut GraphStore, input: NodeId, feature_names: &[&str]) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    let names: Vec<String> = feature_names.iter().map(|s| s.to_string()).collect();
    attributes.insert("feature_names".into(), names.into());
    g.apply_single(SELECT, &[("input", input)], attributes)
}

pub fn prefix(g: &mut GraphStore, input: NodeId, prefix: &str) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("prefix".into(), prefix.into());
    g.apply_single(PREFIX, &[("input", input)], attributes)
}

pub fn glue(g: &mut GraphStore, inputs: &[NodeId]) -> Result<NodeId, GraphError> {
    if inputs.len() > MAX_GLUE_INPUTS {
        return Err(GraphError::InvalidArguments {
            operator: GLUE.into(),
            message: format!("at most {} inputs can be glued, got {}", MAX_GLUE_INPUTS, inputs.len()),
        });
    }
    let slots: Vec<String> = (0..inputs.len()).map(glue_slot).collect();
    let bound: Vec<(&str, NodeId)> = slots.iter().map(String::as_str).zip(inputs.iter().copied()).collect();
    g.apply_single(GLUE, &bound, Attributes::new())
}

pub fn cast(g: &mut GraphStore, input: NodeId, dtype: DType) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("dtype".into(), dtype.name().into());
    g.apply_single(CAST, &[("input", input)], attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{abs, standard_registry};
    use crate::store::InputSpec;

    fn setup() -> (GraphStore, NodeId, NodeId) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64).feature("y", DType::Int64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("z", DType::String).same_sampling_as(a)).unwrap();
        (g, a, b)
    }

    #[test]
    fn test_select_forwards_features() {
        let (mut g, a, _) = setup();
        let computed = abs(&mut g, a).unwrap();
        let out = select(&mut g, computed, &["y"]).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.feature_names(), vec!["y"]);
        assert_eq!(node.features()[0].creator(), g.node(computed).unwrap().creator());
        assert!(select(&mut g, a, &["nope"]).is_err());
        assert!(select(&mut g, a, &["x", "x"]).is_err());
    }

    #[test]
    fn test_prefix_renames() {
        let (mut g, a, _) = setup();
        let out = prefix(&mut g, a, "p_").unwrap();
        assert_eq!(g.node(out).unwrap().feature_names(), vec!["p_x", "p_y"]);
    }

    #[test]
    fn test_glue_concatenates_in_order() {
        let (mut g, a, b) = setup();
        let out = glue(&mut g, &[b, a]).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.feature_names(), vec!["z", "x", "y"]);
        assert_eq!(node.sampling(), g.node(a).unwrap().sampling());
    }

    #[test]
    fn test_glue_rejects_duplicate_names_and_gaps() {
        let (mut g, a, b) = setup();
        let err = glue(&mut g, &[a, a]).unwrap_err();
        assert!(err.to_string().contains("more than one input"));
        let err = g.apply(GLUE, &[("input_0", a), ("input_1", b), ("input_3", b)], Attributes::new()).unwrap_err();
        assert!(err.to_string().contains("contiguous"));
        let err = glue(&mut g, &[a]).unwrap_err();
        assert!(err.to_string().contains("missing input 'input_1'"));
    }

    #[test]
    fn test_glue_requires_shared_sampling() {
        let (mut g, a, _) = setup();
        let c = g.add_input(InputSpec::new("c").feature("w", DType::Float64)).unwrap();
        assert!(matches!(glue(&mut g, &[a, c]), Err(GraphError::SamplingMismatch { .. })));
    }

    #[test]
    fn test_cast_changes_dtype() {
        let (mut g, a, _) = setup();
        let out = cast(&mut g, a, DType::Float32).unwrap();
        let node = g.node(out).unwrap();
        assert!(node.features().iter().all(|f| f.dtype() == DType::Float32));
        let mut attrs = Attributes::new();
        attrs.insert("dtype".into(), "DECIMAL".into());
        assert!(g.apply(CAST, &[("input", a)], attrs).is_err());
    }
}
