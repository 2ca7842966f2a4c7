//! Eager in-memory backend over `EventSet` payloads.
pub mod elementwise;
pub mod event_set;
pub mod reshape;
pub mod temporal;

pub use event_set::{Column, EventSet, EventSetError, IndexGroup, IndexKey, IndexValue};

use crate::compute::{Implementation, ImplementationRegistry, ImplementationRegistryBuilder, Inputs, KernelError, Outputs};
use crate::ops::registry::{OperatorRegistry, RegistryError};
use crate::store::Operator;
use std::collections::BTreeMap;

pub const BACKEND: &str = "array";

pub(crate) fn input<'a>(operator: &Operator, inputs: &Inputs<'a, EventSet>, slot: &str) -> Result<&'a EventSet, KernelError> {
    inputs
        .get(slot)
        .copied()
        .ok_or_else(|| KernelError::new(operator.key(), format!("input '{}' was not provided", slot)))
}

pub(crate) fn single_output(set: EventSet) -> Outputs<EventSet> {
    BTreeMap::from([("output".to_string(), set)])
}

/// Registers `factory` under `key` when `operators` defines that key.
pub(crate) fn register_kernel<F>(
    builder: &mut ImplementationRegistryBuilder<EventSet>,
    operators: &OperatorRegistry,
    key: &str,
    factory: F,
) -> Result<(), RegistryError>
where
    F: Fn(&Operator) -> Result<Box<dyn Implementation<EventSet>>, KernelError> + Send + Sync + 'static,
{
    if operators.contains(key) {
        builder.register_operator_implementation(key, factory)?;
    }
    Ok(())
}

/// Array kernels for every operator of `operators` this backend knows.
/// Operators registered by callers get no entry and evaluate to
/// `UnimplementedOperator` until a kernel is added for them.
pub fn implementations(operators: &OperatorRegistry) -> Result<ImplementationRegistry<EventSet>, RegistryError> {
    let mut builder = ImplementationRegistry::builder(BACKEND);
    elementwise::register(&mut builder, operators)?;
    temporal::register(&mut builder, operators)?;
    reshape::register(&mut builder, operators)?;
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::build_schedule;
    use crate::compute::{EvaluationError, EvaluationOptions, Evaluator};
    use crate::ops::{self, standard_registry};
    use crate::store::{DType, GraphStore, InputSpec, NodeId};
    use std::sync::Arc;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("eventgraph_core=trace").try_init();
    }

    fn floats(set: &EventSet, key: &[IndexValue], name: &str) -> Vec<f64> {
        match set.column(key, name) {
            Some(Column::Float64(v)) => v.clone(),
            other => panic!("expected a float64 column '{name}', got {other:?}"),
        }
    }

    fn series(values: &[f64]) -> EventSet {
        let timestamps = (0..values.len()).map(|i| i as f64).collect();
        EventSet::from_columns(timestamps, vec![("x", Column::Float64(values.to_vec()))]).unwrap()
    }

    #[test]
    fn test_every_standard_operator_has_a_kernel() {
        let ops = standard_registry().unwrap();
        let kernels = implementations(&ops).unwrap();
        for key in ops.registered_operators().keys() {
            assert!(kernels.contains(key), "{key} has no array kernel");
        }
        assert_eq!(kernels.backend(), BACKEND);
    }

    #[test]
    fn test_kernels_follow_the_operator_registry() {
        let mut builder = OperatorRegistry::builder();
        ops::unary::register(&mut builder).unwrap();
        ops::window::register(&mut builder).unwrap();
        let ops = builder.build();
        let kernels = implementations(&ops).unwrap();
        assert_eq!(kernels.keys().collect::<Vec<_>>(), ops.registered_operators().keys().copied().collect::<Vec<_>>());

        let mut builder = ImplementationRegistry::builder(BACKEND);
        temporal::register(&mut builder, &ops).unwrap();
        assert!(matches!(
            temporal::register(&mut builder, &ops),
            Err(RegistryError::DuplicateRegistration { backend: Some(_), .. })
        ));
    }

    #[test]
    fn test_arithmetic_on_shared_sampling() {
        init_tracing();
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("y", DType::Float64).same_sampling_as(a)).unwrap();
        let sum = ops::add(&mut g, a, b).unwrap();
        let out = ops::multiply(&mut g, sum, sum).unwrap();

        let kernels = implementations(g.registry()).unwrap();
        let data_a = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let data_b = data_a.with_columns(vec![("y", Column::Float64(vec![1.0; 5]))]).unwrap();
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data_a), (b, data_b)]), &[out]).unwrap();

        assert_eq!(floats(&result[&out], &[], "mult_add_x_y_add_x_y"), vec![4.0, 9.0, 16.0, 25.0, 36.0]);
    }

    #[test]
    fn test_unaligned_input_data_is_rejected() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("x", DType::Float64).same_sampling_as(a)).unwrap();
        let out = ops::subtract(&mut g, a, b).unwrap();
        let kernels = implementations(g.registry()).unwrap();

        let data_a = series(&[1.0, 2.0]);
        let data_b = EventSet::from_columns(vec![5.0, 6.0], vec![("x", Column::Float64(vec![1.0, 2.0]))]).unwrap();
        let err = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data_a), (b, data_b)]), &[out]).unwrap_err();
        assert!(matches!(err, EvaluationError::ExecutionCheck { ref operator, .. } if operator == "SUBTRACTION"));
    }

    struct ForgetfulAbs;

    impl Implementation<EventSet> for ForgetfulAbs {
        fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
            let set = input(operator, inputs, "input")?;
            let mut copy = set.clone();
            // Same values, fresh timestamps shifted by one.
            for group in copy.groups.values_mut() {
                group.timestamps = group.timestamps.iter().map(|t| t + 1.0).collect::<Vec<_>>().into();
            }
            Ok(single_output(copy))
        }
    }

    #[test]
    fn test_execution_check_catches_broken_sampling() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let out = ops::abs(&mut g, a).unwrap();
        let mut builder = ImplementationRegistry::builder("broken");
        builder.register_operator_implementation("ABS", |_| Ok(Box::new(ForgetfulAbs))).unwrap();
        let kernels = builder.build();

        let inputs = || BTreeMap::from([(a, series(&[-1.0, 2.0]))]);
        let err = Evaluator::new(&g, &kernels).run(inputs(), &[out]).unwrap_err();
        assert!(matches!(err, EvaluationError::ExecutionCheck { ref message, .. } if message.contains("sampling")));

        let unchecked = EvaluationOptions { check_execution: false, ..Default::default() };
        assert!(Evaluator::new(&g, &kernels).with_options(unchecked).run(inputs(), &[out]).is_ok());
    }

    #[test]
    fn test_outputs_share_timestamps_with_inputs() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let out = ops::prefix(&mut g, a, "p_").unwrap();
        let kernels = implementations(g.registry()).unwrap();
        let data = series(&[1.0, 2.0]);
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data.clone())]), &[out]).unwrap();

        let before = &data.group(&[]).unwrap().timestamps;
        let after = &result[&out].group(&[]).unwrap().timestamps;
        assert!(Arc::ptr_eq(before, after));
    }

    #[test]
    fn test_windows_at_another_sampling() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let ticks = g.add_input(InputSpec::new("ticks")).unwrap();
        let out = ops::moving(&mut g, ops::WindowOp::MovingSum, a, 2.0, Some(ticks)).unwrap();
        let kernels = implementations(g.registry()).unwrap();

        let data = series(&[1.0, 2.0, 4.0, 8.0]);
        let tick_data = EventSet::from_columns(vec![1.0, 3.0, 10.0], vec![]).unwrap();
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data), (ticks, tick_data)]), &[out]).unwrap();
        assert_eq!(floats(&result[&out], &[], "moving_sum_x"), vec![3.0, 12.0, 0.0]);
    }

    #[test]
    fn test_filter_lag_and_calendar() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64).unix_timestamps(true)).unwrap();
        let positive = ops::scalar(&mut g, ops::ScalarOp::Gt, a, 0.0, false).unwrap();
        let kept = ops::filter(&mut g, a, positive).unwrap();
        let later = ops::lag(&mut g, kept, 3600.0).unwrap();
        let hour = ops::calendar(&mut g, ops::CalendarUnit::Hour, later).unwrap();
        let kernels = implementations(g.registry()).unwrap();

        let data = EventSet::from_columns(
            vec![0.0, 3600.0, 7200.0],
            vec![("x", Column::Float64(vec![1.0, -1.0, 2.0]))],
        )
        .unwrap();
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data)]), &[kept, hour]).unwrap();
        assert_eq!(floats(&result[&kept], &[], "x"), vec![1.0, 2.0]);
        assert_eq!(result[&hour].column(&[], "calendar_hour"), Some(&Column::Int32(vec![1, 3])));
    }

    #[test]
    fn test_add_then_drop_index_round_trip() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("store", DType::Int64).feature("x", DType::Float64)).unwrap();
        let indexed = ops::add_index(&mut g, a, &["store"]).unwrap();
        let flat = ops::drop_index(&mut g, indexed, &["store"], true).unwrap();
        let kernels = implementations(g.registry()).unwrap();

        let data = EventSet::from_columns(
            vec![1.0, 2.0, 2.0, 3.0],
            vec![("store", Column::Int64(vec![2, 1, 2, 1])), ("x", Column::Float64(vec![10.0, 20.0, 30.0, 40.0]))],
        )
        .unwrap();
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data)]), &[indexed, flat]).unwrap();

        let by_store = &result[&indexed];
        assert_eq!(by_store.groups().count(), 2);
        assert_eq!(floats(by_store, &[IndexValue::Int(1)], "x"), vec![20.0, 40.0]);
        assert_eq!(by_store.group(&[IndexValue::Int(2)]).unwrap().timestamps(), &[1.0, 2.0]);

        let merged = &result[&flat];
        assert_eq!(merged.features()[0], ("store".to_string(), DType::Int64));
        assert_eq!(merged.group(&[]).unwrap().timestamps(), &[1.0, 2.0, 2.0, 3.0]);
        // Ties at t=2 keep index key order: store 1 before store 2.
        assert_eq!(merged.column(&[], "store"), Some(&Column::Int64(vec![2, 1, 2, 1])));
        assert_eq!(floats(merged, &[], "x"), vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_join_on_timestamp_and_key() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let left = g.add_input(InputSpec::new("left").feature("id", DType::Int64).feature("x", DType::Float64)).unwrap();
        let right = g.add_input(InputSpec::new("right").feature("id", DType::Int64).feature("y", DType::Int32)).unwrap();
        let out = ops::join(&mut g, left, right, Some("id")).unwrap();
        let kernels = implementations(g.registry()).unwrap();

        let l = EventSet::from_columns(
            vec![1.0, 2.0, 3.0],
            vec![("id", Column::Int64(vec![7, 7, 8])), ("x", Column::Float64(vec![0.1, 0.2, 0.3]))],
        )
        .unwrap();
        let r = EventSet::from_columns(
            vec![1.0, 3.0, 3.0],
            vec![("id", Column::Int64(vec![7, 9, 8])), ("y", Column::Int32(vec![100, 200, 300]))],
        )
        .unwrap();
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(left, l), (right, r)]), &[out]).unwrap();
        let joined = &result[&out];
        assert_eq!(joined.features().len(), 3);
        assert_eq!(joined.column(&[], "y"), Some(&Column::Int32(vec![100, 0, 300])));
    }

    #[test]
    fn test_glue_select_and_cast() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64).feature("n", DType::Int64)).unwrap();
        let b = g.add_input(InputSpec::new("b").feature("flag", DType::Boolean).same_sampling_as(a)).unwrap();
        let picked = ops::select(&mut g, a, &["n"]).unwrap();
        let as_float = ops::cast(&mut g, picked, DType::Float64).unwrap();
        let glued = ops::glue(&mut g, &[as_float, b]).unwrap();
        let kernels = implementations(g.registry()).unwrap();

        let data_a = EventSet::from_columns(
            vec![1.0, 2.0],
            vec![("x", Column::Float64(vec![0.5, 0.6])), ("n", Column::Int64(vec![3, 4]))],
        )
        .unwrap();
        let data_b = data_a.with_columns(vec![("flag", Column::Boolean(vec![true, false]))]).unwrap();
        let result = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, data_a), (b, data_b)]), &[glued]).unwrap();
        let out = &result[&glued];
        assert_eq!(out.features(), &[("n".to_string(), DType::Float64), ("flag".to_string(), DType::Boolean)]);
        assert_eq!(floats(out, &[], "n"), vec![3.0, 4.0]);
    }

    #[test]
    fn test_eviction_does_not_change_results() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let s = ops::simple_moving_average(&mut g, a, 3.0).unwrap();
        let t = ops::abs(&mut g, s).unwrap();
        let u = ops::subtract(&mut g, s, t).unwrap();
        let kernels = implementations(g.registry()).unwrap();
        let schedule = build_schedule(&g, &[a], &[u, s]).unwrap();

        let inputs = || BTreeMap::from([(a, series(&[-3.0, 1.0, -4.0, 1.0, 5.0]))]);
        let evicting = Evaluator::new(&g, &kernels).run_schedule(&schedule, inputs()).unwrap();
        let keep_all = EvaluationOptions { evict_intermediates: false, ..Default::default() };
        let retained = Evaluator::new(&g, &kernels).with_options(keep_all).run_schedule(&schedule, inputs()).unwrap();
        assert_eq!(evicting, retained);
        assert_eq!(evicting.keys().copied().collect::<Vec<NodeId>>(), {
            let mut ids = vec![u, s];
            ids.sort();
            ids
        });
    }

    #[test]
    fn test_batch_evaluation() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let out = ops::scalar(&mut g, ops::ScalarOp::Mul, a, 2.0, false).unwrap();
        let kernels = implementations(g.registry()).unwrap();
        let schedule = build_schedule(&g, &[a], &[out]).unwrap();

        let batch: Vec<_> = (0..16).map(|i| BTreeMap::from([(a, series(&[i as f64, 1.0]))])).collect();
        let results = Evaluator::new(&g, &kernels).run_batch(&schedule, batch).unwrap();
        for (i, result) in results.iter().enumerate() {
            assert_eq!(floats(&result[&out], &[], "x"), vec![2.0 * i as f64, 2.0]);
        }
    }

    #[test]
    fn test_user_operator_without_kernel_is_unimplemented() {
        let mut g = GraphStore::new(standard_registry().unwrap());
        let a = g.add_input(InputSpec::new("a").feature("x", DType::Float64)).unwrap();
        let out = ops::abs(&mut g, a).unwrap();
        let mut builder = ImplementationRegistry::<EventSet>::builder(BACKEND);
        builder.register_operator_implementation("PREFIX", |op| Ok(Box::new(reshape::PrefixKernel::new(op)?))).unwrap();
        let kernels = builder.build();
        let err = Evaluator::new(&g, &kernels).run(BTreeMap::from([(a, series(&[1.0]))]), &[out]).unwrap_err();
        assert_eq!(err, EvaluationError::UnimplementedOperator { key: "ABS".into(), backend: BACKEND.into() });
    }
}
