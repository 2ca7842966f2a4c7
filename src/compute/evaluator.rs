use super::error::EvaluationError;
use super::implementation::{EventData, Implementation, ImplementationRegistry, Inputs, Outputs};
use super::ledger::Ledger;
use super::options::EvaluationOptions;
use crate::analysis::{build_schedule, Schedule, ScheduleStep};
use crate::store::{GraphStore, NodeId};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, instrument, trace};

/// Walks a schedule against one backend's implementations.
pub struct Evaluator<'a, D: EventData> {
    store: &'a GraphStore,
    implementations: &'a ImplementationRegistry<D>,
    options: EvaluationOptions,
}

impl<'a, D: EventData> Evaluator<'a, D> {
    pub fn new(store: &'a GraphStore, implementations: &'a ImplementationRegistry<D>) -> Self {
        Self { store, implementations, options: EvaluationOptions::default() }
    }

    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &EvaluationOptions { &self.options }

    /// Schedules `outputs` from the nodes present in `inputs`, then runs it.
    pub fn run(&self, inputs: BTreeMap<NodeId, D>, outputs: &[NodeId]) -> Result<BTreeMap<NodeId, D>, EvaluationError> {
        let input_ids: Vec<NodeId> = inputs.keys().copied().collect();
        let schedule = build_schedule(self.store, &input_ids, outputs)?;
        self.run_schedule(&schedule, inputs)
    }

    #[instrument(skip_all, fields(backend = %self.implementations.backend(), steps = schedule.len()))]
    pub fn run_schedule(&self, schedule: &Schedule, inputs: BTreeMap<NodeId, D>) -> Result<BTreeMap<NodeId, D>, EvaluationError> {
        let implementations = self.resolve(schedule)?;
        self.execute(schedule, &implementations, inputs)
    }

    /// Runs the same schedule over independent input sets in parallel. Each
    /// set gets its own cache; results keep the order of `batch`.
    pub fn run_batch(
        &self,
        schedule: &Schedule,
        batch: Vec<BTreeMap<NodeId, D>>,
    ) -> Result<Vec<BTreeMap<NodeId, D>>, EvaluationError> {
        let implementations = self.resolve(schedule)?;
        debug!(sets = batch.len(), "running batch");
        batch.into_par_iter().map(|inputs| self.execute(schedule, &implementations, inputs)).collect()
    }

    /// Builds every implementation up front so a missing one fails before any work.
    fn resolve(&self, schedule: &Schedule) -> Result<Vec<Box<dyn Implementation<D>>>, EvaluationError> {
        schedule
            .steps
            .iter()
            .map(|step| {
                let operator = self.store.operator(step.operator).ok_or_else(|| EvaluationError::ExecutionCheck {
                    operator: step.key.clone(),
                    message: format!("operator #{} is not part of the graph", step.operator.0),
                })?;
                self.implementations.get_implementation(operator)
            })
            .collect()
    }

    fn execute(
        &self,
        schedule: &Schedule,
        implementations: &[Box<dyn Implementation<D>>],
        mut inputs: BTreeMap<NodeId, D>,
    ) -> Result<BTreeMap<NodeId, D>, EvaluationError> {
        let mut ledger = Ledger::new(schedule, self.options.evict_intermediates);

        for &node in &schedule.inputs {
            let data = inputs.remove(&node).ok_or_else(|| EvaluationError::MissingInputData {
                node,
                name: self.store.describe_node(node),
            })?;
            if self.options.check_execution {
                self.check_node(&data, node, "input")?;
            }
            ledger.insert(node, data);
        }

        for (step, implementation) in schedule.steps.iter().zip(implementations) {
            trace!(operator = %step.key, id = step.operator.0, "running step");
            let mut outputs = self.call(step, implementation.as_ref(), &ledger)?;

            if self.options.check_execution {
                self.check_step(step, &ledger, &outputs)?;
            }
            for input in &step.inputs {
                ledger.release(input.node);
            }
            for (slot, node) in &step.outputs {
                let data = outputs.remove(slot).ok_or_else(|| EvaluationError::ExecutionCheck {
                    operator: step.key.clone(),
                    message: format!("implementation did not produce output '{}'", slot),
                })?;
                ledger.insert(*node, data);
            }
        }

        ledger.into_outputs(&schedule.outputs).map_err(|node| EvaluationError::ExecutionCheck {
            operator: "output".into(),
            message: format!("no data was produced for {}", self.store.describe_node(node)),
        })
    }

    fn call(
        &self,
        step: &ScheduleStep,
        implementation: &dyn Implementation<D>,
        ledger: &Ledger<D>,
    ) -> Result<Outputs<D>, EvaluationError> {
        let operator = self.store.operator(step.operator).ok_or_else(|| EvaluationError::ExecutionCheck {
            operator: step.key.clone(),
            message: format!("operator #{} is not part of the graph", step.operator.0),
        })?;

        let mut args: Inputs<'_, D> = BTreeMap::new();
        for input in &step.inputs {
            let data = ledger.get(input.node).ok_or_else(|| EvaluationError::ExecutionCheck {
                operator: step.key.clone(),
                message: format!("input '{}' is not available", input.slot),
            })?;
            args.insert(input.slot.as_str(), data);
        }
        Ok(implementation.call(operator, &args)?)
    }

    fn check_node(&self, data: &D, node: NodeId, context: &str) -> Result<(), EvaluationError> {
        let node_def = self.store.node(node).ok_or_else(|| EvaluationError::ExecutionCheck {
            operator: context.to_string(),
            message: format!("unknown node #{}", node.0),
        })?;
        data.check_schema(self.store, node_def).map_err(|message| EvaluationError::ExecutionCheck {
            operator: context.to_string(),
            message: format!("{}: {}", self.store.describe_node(node), message),
        })
    }

    /// Output slots, schemas and sampling sharing of one step.
    fn check_step(&self, step: &ScheduleStep, ledger: &Ledger<D>, outputs: &Outputs<D>) -> Result<(), EvaluationError> {
        let fail = |message: String| EvaluationError::ExecutionCheck { operator: step.key.clone(), message };

        if let Some(extra) = outputs.keys().find(|k| !step.outputs.iter().any(|(s, _)| s == *k)) {
            return Err(fail(format!("unexpected output '{}'", extra)));
        }

        for (slot, node) in &step.outputs {
            let Some(data) = outputs.get(slot) else {
                return Err(fail(format!("implementation did not produce output '{}'", slot)));
            };
            self.check_node(data, *node, &step.key)?;

            let sampling = self.store.node(*node).map(|n| n.sampling());
            for input in &step.inputs {
                if self.store.node(input.node).map(|n| n.sampling()) != sampling {
                    continue;
                }
                if let Some(source) = ledger.get(input.node) {
                    if !data.shares_sampling(source) {
                        return Err(fail(format!(
                            "output '{}' must share the sampling of input '{}'",
                            slot, input.slot
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
