//! Deferred backend: evaluation records a stage graph for an external
//! distributed engine instead of computing values.
use crate::compute::{EventData, Implementation, ImplementationRegistry, Inputs, KernelError, Outputs};
use crate::ops::registry::{OperatorRegistry, RegistryError};
use crate::store::{Attributes, Operator};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub const BACKEND: &str = "pipeline";

#[derive(Debug, PartialEq)]
pub enum Stage {
    /// Data read from outside the pipeline.
    Source { name: String },
    /// Output `slot` of operator `key` applied to `inputs`.
    Transform { key: String, attributes: Attributes, inputs: Vec<(String, PCollection)>, slot: String },
}

/// Handle on one deferred collection. Clones share the stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PCollection(Arc<Stage>);

impl PCollection {
    pub fn source(name: impl Into<String>) -> Self {
        Self(Arc::new(Stage::Source { name: name.into() }))
    }

    pub fn stage(&self) -> &Stage { &self.0 }

    pub fn same_stage(&self, other: &PCollection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn parents(&self) -> impl Iterator<Item = &PCollection> {
        let inputs: &[(String, PCollection)] = match self.stage() {
            Stage::Transform { inputs, .. } => inputs,
            Stage::Source { .. } => &[],
        };
        inputs.iter().map(|(_, c)| c)
    }
}

impl fmt::Display for PCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage() {
            Stage::Source { name } => write!(f, "source({})", name),
            Stage::Transform { key, slot, .. } => write!(f, "{}.{}", key, slot),
        }
    }
}

impl EventData for PCollection {}

/// Records the operator as a transform stage on each output slot.
pub struct DeferredTransform;

impl Implementation<PCollection> for DeferredTransform {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, PCollection>) -> Result<Outputs<PCollection>, KernelError> {
        let stage_inputs: Vec<(String, PCollection)> = inputs.iter().map(|(s, c)| (s.to_string(), (*c).clone())).collect();
        Ok(operator
            .outputs()
            .iter()
            .map(|(slot, _)| {
                let stage = Stage::Transform {
                    key: operator.key().to_string(),
                    attributes: operator.attributes().clone(),
                    inputs: stage_inputs.clone(),
                    slot: slot.clone(),
                };
                (slot.clone(), PCollection(Arc::new(stage)))
            })
            .collect())
    }
}

/// One deferred transform for every operator in `operators`.
pub fn implementations(operators: &OperatorRegistry) -> Result<ImplementationRegistry<PCollection>, RegistryError> {
    let mut builder = ImplementationRegistry::builder(BACKEND);
    for key in operators.registered_operators().keys() {
        builder.register_operator_implementation(key, |_| Ok(Box::new(DeferredTransform)))?;
    }
    Ok(builder.build())
}

pub struct Pipeline;

impl Pipeline {
    /// Every stage reachable from `outputs`, each once, parents first.
    pub fn stages(outputs: &[PCollection]) -> Vec<PCollection> {
        let mut seen: HashSet<*const Stage> = HashSet::new();
        let mut order = Vec::new();
        // Explicit stack of (collection, parents_pushed).
        let mut stack: Vec<(PCollection, bool)> = outputs.iter().rev().map(|c| (c.clone(), false)).collect();
        while let Some((collection, expanded)) = stack.pop() {
            let ptr = Arc::as_ptr(&collection.0);
            if seen.contains(&ptr) {
                continue;
            }
            if expanded {
                seen.insert(ptr);
                order.push(collection);
                continue;
            }
            let parents: Vec<PCollection> = collection.parents().cloned().collect();
            stack.push((collection, true));
            stack.extend(parents.into_iter().rev().map(|p| (p, false)));
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Evaluator;
    use crate::ops::{self, standard_registry};
    use crate::store::{DType, GraphStore, InputSpec};
    use std::collections::BTreeMap;

    #[test]
    fn test_every_operator_is_deferred() {
        let ops = standard_registry().unwrap();
        let registry = implementations(&ops).unwrap();
        assert_eq!(registry.keys().count(), ops.len());
    }

    #[test]
    fn test_diamond_produces_shared_stages() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let b = ops::abs(&mut g, a).unwrap();
        let c = ops::simple_moving_average(&mut g, a, 5.0).unwrap();
        let c = ops::select(&mut g, c, &["sma_x"]).unwrap();
        let c = ops::prefix(&mut g, c, "").unwrap();
        let d = ops::glue(&mut g, &[b, c]).unwrap();
        let registry = implementations(g.registry()).unwrap();

        let out = Evaluator::new(&g, &registry).run(BTreeMap::from([(a, PCollection::source("a"))]), &[d]).unwrap();
        let stages = Pipeline::stages(&[out[&d].clone()]);
        let labels: Vec<String> = stages.iter().map(ToString::to_string).collect();
        assert_eq!(
            labels,
            vec!["source(a)", "ABS.output", "SIMPLE_MOVING_AVERAGE.output", "SELECT.output", "PREFIX.output", "GLUE.output"]
        );
    }

    #[test]
    fn test_stages_of_several_outputs_are_deduplicated() {
        let src = PCollection::source("events");
        let stage = |key: &str, input: &PCollection| {
            PCollection(Arc::new(Stage::Transform {
                key: key.into(),
                attributes: Attributes::new(),
                inputs: vec![("input".into(), input.clone())],
                slot: "output".into(),
            }))
        };
        let x = stage("ABS", &src);
        let y = stage("LAG", &x);
        let stages = Pipeline::stages(&[y.clone(), x.clone(), y.clone()]);
        assert_eq!(stages.len(), 3);
        assert!(stages[0].same_stage(&src));
        assert!(stages[2].same_stage(&y));
    }
}
