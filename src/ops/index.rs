//! Moving columns between the feature set and the index.
use super::definition::*;
use super::registry::{OperatorRegistryBuilder, RegistryError};
use crate::store::{AttributeType, Attributes, GraphError, GraphStore, IndexLevel, NodeId};
use std::collections::HashSet;

pub const ADD_INDEX: &str = "ADD_INDEX";
pub const DROP_INDEX: &str = "DROP_INDEX";

fn ensure_unique(ctx: &InferContext<'_>, names: &[String]) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    match names.iter().find(|n| !seen.insert(n.as_str())) {
        Some(dup) => Err(ctx.bad_attribute("indexes", format!("'{}' is listed twice", dup))),
        None if names.is_empty() => Err(ctx.bad_attribute("indexes", "at least one name is required")),
        None => Ok(()),
    }
}

/// Turns features into additional index levels.
pub struct AddIndexOperator;

impl OperatorKind for AddIndexOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(ADD_INDEX).input("input").output("output").attribute("indexes", AttributeType::StringList)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        let indexes = ctx.attr_strings("indexes")?;
        ensure_unique(ctx, indexes)?;

        let sampling = ctx.sampling_of(input);
        for name in indexes {
            let feature = input.feature(name).ok_or_else(|| {
                ctx.bad_attribute("indexes", format!("feature '{}' does not exist, available: {:?}", name, input.feature_names()))
            })?;
            if !feature.dtype().is_index_compatible() {
                return Err(ctx.type_mismatch(format!(
                    "feature '{}' has dtype {} and cannot be used as an index",
                    name,
                    feature.dtype()
                )));
            }
            if sampling.index_names().any(|n| n == name) {
                return Err(ctx.bad_attribute("indexes", format!("'{}' is already an index", name)));
            }
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let indexes = ctx.attr_strings("indexes")?;
        let sampling = ctx.sampling_of(input);

        let mut index = sampling.index().to_vec();
        index.extend(indexes.iter().filter_map(|n| input.feature(n)).map(|f| IndexLevel::new(f.name(), f.dtype())));

        let features = input
            .features()
            .iter()
            .filter(|f| !indexes.iter().any(|n| n == f.name()))
            .map(|f| OutputFeature::created(f.name(), f.dtype()))
            .collect();
        Ok(vec![OutputSchema::new(
            "output",
            features,
            OutputSampling::New { index, is_unix_timestamp: sampling.is_unix_timestamp() },
        )])
    }
}

/// Removes index levels, optionally keeping them as leading features.
pub struct DropIndexOperator;

impl OperatorKind for DropIndexOperator {
    fn definition(&self) -> OperatorDef {
        OperatorDef::new(DROP_INDEX)
            .input("input")
            .output("output")
            .attribute("indexes", AttributeType::StringList)
            .attribute("keep", AttributeType::Bool)
    }

    fn validate(&self, ctx: &InferContext<'_>) -> Result<(), GraphError> {
        let input = ctx.require_input("input")?;
        let indexes = ctx.attr_strings("indexes")?;
        ensure_unique(ctx, indexes)?;

        let sampling = ctx.sampling_of(input);
        for name in indexes {
            if !sampling.index_names().any(|n| n == name) {
                return Err(ctx.bad_attribute(
                    "indexes",
                    format!("'{}' is not an index, available: {:?}", name, sampling.index_names().collect::<Vec<_>>()),
                ));
            }
            if ctx.attr_bool("keep")? && input.feature(name).is_some() {
                return Err(ctx.invalid(format!("index '{}' cannot be kept: a feature with that name already exists", name)));
            }
        }
        Ok(())
    }

    fn output_schema(&self, ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
        let input = ctx.require_input("input")?;
        let indexes = ctx.attr_strings("indexes")?;
        let sampling = ctx.sampling_of(input);
        let dropped = |level: &&IndexLevel| indexes.iter().any(|n| *n == level.name);

        let mut features = Vec::new();
        if ctx.attr_bool("keep")? {
            // Kept levels follow the order of the `indexes` attribute.
            for name in indexes {
                if let Some(level) = sampling.index().iter().find(|l| l.name == *name) {
                    features.push(OutputFeature::created(&level.name, level.dtype));
                }
            }
        }
        features.extend(input.features().iter().map(|f| OutputFeature::created(f.name(), f.dtype())));

        let index = sampling.index().iter().filter(|l| !dropped(l)).cloned().collect();
        Ok(vec![OutputSchema::new(
            "output",
            features,
            OutputSampling::New { index, is_unix_timestamp: sampling.is_unix_timestamp() },
        )])
    }
}

pub fn register(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    builder.register_operator(AddIndexOperator)?.register_operator(DropIndexOperator)?;
    Ok(())
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn add_index(g: &mut GraphStore, input: NodeId, indexes: &[&str]) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("indexes".into(), names(indexes).into());
    g.apply_single(ADD_INDEX, &[("input", input)], attributes)
}

pub fn drop_index(g: &mut GraphStore, input: NodeId, indexes: &[&str], keep: bool) -> Result<NodeId, GraphError> {
    let mut attributes = Attributes::new();
    attributes.insert("indexes".into(), names(indexes).into());
    attributes.insert("keep".into(), keep.into());
    g.apply_single(DROP_INDEX, &[("input", input)], attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::standard_registry;
    use crate::store::{DType, InputSpec};

    fn setup() -> (GraphStore, NodeId) {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g
            .add_input(
                InputSpec::new("sales")
                    .feature("store", DType::String)
                    .feature("price", DType::Float64)
                    .index("region", DType::Int32),
            )
            .unwrap();
        (g, a)
    }

    #[test]
    fn test_add_index_moves_features_into_index() {
        let (mut g, a) = setup();
        let out = add_index(&mut g, a, &["store"]).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.feature_names(), vec!["price"]);
        let sampling = g.sampling(node.sampling()).unwrap();
        assert_eq!(sampling.index_names().collect::<Vec<_>>(), vec!["region", "store"]);
        assert_eq!(sampling.index()[1].dtype, DType::String);
    }

    #[test]
    fn test_add_index_rejects_float_features() {
        let (mut g, a) = setup();
        assert!(matches!(add_index(&mut g, a, &["price"]), Err(GraphError::TypeMismatch { .. })));
        assert!(add_index(&mut g, a, &["missing"]).is_err());
        assert!(add_index(&mut g, a, &[]).is_err());
    }

    #[test]
    fn test_drop_index_keep_prepends_columns() {
        let (mut g, a) = setup();
        let out = drop_index(&mut g, a, &["region"], true).unwrap();
        let node = g.node(out).unwrap();
        assert_eq!(node.feature_names(), vec!["region", "store", "price"]);
        assert_eq!(node.features()[0].dtype(), DType::Int32);
        assert_eq!(g.sampling(node.sampling()).unwrap().index().len(), 0);
        assert_ne!(node.sampling(), g.node(a).unwrap().sampling());
    }

    #[test]
    fn test_drop_index_without_keep() {
        let (mut g, a) = setup();
        let out = drop_index(&mut g, a, &["region"], false).unwrap();
        assert_eq!(g.node(out).unwrap().feature_names(), vec!["store", "price"]);
        assert!(drop_index(&mut g, a, &["store"], false).is_err());
    }
}
