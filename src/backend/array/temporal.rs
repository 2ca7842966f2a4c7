//! Kernels that read or rewrite timestamps: moving windows, filter, lag and friends.
use super::event_set::{Column, EventSet, IndexGroup};
use super::{input, register_kernel, single_output};
use crate::compute::{Implementation, ImplementationRegistryBuilder, Inputs, KernelError, Outputs};
use crate::ops::filter::FILTER;
use crate::ops::registry::{OperatorRegistry, RegistryError};
use crate::ops::temporal::{LAG, TIMESTAMPS, UNIQUE_TIMESTAMPS};
use crate::ops::WindowOp;
use crate::store::{AttributeValue, DType, Operator};
use std::sync::Arc;

fn number_attribute(operator: &Operator, key: &str) -> Result<f64, KernelError> {
    operator
        .attribute(key)
        .and_then(AttributeValue::as_f64)
        .ok_or_else(|| KernelError::new(operator.key(), format!("missing numeric '{}'", key)))
}

/// Aggregate of the non-NaN values in one window.
fn aggregate(op: WindowOp, values: &[f64]) -> f64 {
    let present = values.iter().copied().filter(|v| !v.is_nan());
    match op {
        WindowOp::MovingSum => present.sum(),
        WindowOp::MovingCount => present.count() as f64,
        WindowOp::SimpleMovingAverage => {
            let (sum, n) = present.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 { f64::NAN } else { sum / n as f64 }
        }
        WindowOp::MovingStandardDeviation => {
            let (sum, sq, n) = present.fold((0.0, 0.0, 0usize), |(s, q, n), v| (s + v, q + v * v, n + 1));
            if n == 0 {
                return f64::NAN;
            }
            let mean = sum / n as f64;
            (sq / n as f64 - mean * mean).max(0.0).sqrt()
        }
        WindowOp::MovingMin => present.fold(f64::NAN, f64::min),
        WindowOp::MovingMax => present.fold(f64::NAN, f64::max),
    }
}

/// Trailing-window aggregation over `(t - window_length, t]`.
pub struct WindowKernel {
    op: WindowOp,
    window_length: f64,
}

impl WindowKernel {
    pub fn new(op: WindowOp, operator: &Operator) -> Result<Self, KernelError> {
        Ok(Self { op, window_length: number_attribute(operator, "window_length")? })
    }

    fn column(&self, source: Option<&IndexGroup>, at: &[f64], feature: usize, dtype: DType) -> Column {
        let out_dtype = self.op.output_dtype(dtype);
        let Some(group) = source else {
            return Column::from_f64(out_dtype, at.iter().map(|_| aggregate(self.op, &[])).collect());
        };
        let times = &group.timestamps[..];
        let windows = at.iter().map(|&t| {
            let start = times.partition_point(|&x| x <= t - self.window_length);
            let end = times.partition_point(|&x| x <= t);
            start..end.max(start)
        });

        let exact = matches!(self.op, WindowOp::MovingSum | WindowOp::MovingMin | WindowOp::MovingMax);
        match &group.columns[feature] {
            // Integer sums and extremes stay exact past 2^53.
            Column::Int64(v) if exact => Column::Int64(windows.map(|r| integer_window(self.op, &v[r], i64::wrapping_add)).collect()),
            Column::Int32(v) if exact => Column::Int32(windows.map(|r| integer_window(self.op, &v[r], i32::wrapping_add)).collect()),
            column => {
                // Strings only reach here through MOVING_COUNT, which needs presence alone.
                let values = column.to_f64().unwrap_or_else(|| vec![1.0; column.len()]);
                Column::from_f64(out_dtype, windows.map(|r| aggregate(self.op, &values[r])).collect())
            }
        }
    }
}

/// Sum, min or max of one integer window. An empty window yields zero.
fn integer_window<T: Copy + Ord + Default>(op: WindowOp, values: &[T], add: fn(T, T) -> T) -> T {
    match op {
        WindowOp::MovingMin => values.iter().copied().min().unwrap_or_default(),
        WindowOp::MovingMax => values.iter().copied().max().unwrap_or_default(),
        _ => values.iter().copied().fold(T::default(), add),
    }
}

impl Implementation<EventSet> for WindowKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let sampling = inputs.get("sampling").copied().unwrap_or(set);
        let features = set
            .features
            .iter()
            .map(|(n, d)| (format!("{}_{}", self.op.prefix(), n), self.op.output_dtype(*d)))
            .collect();

        let mut out = EventSet::new(features, sampling.index.clone());
        for (key, target) in &sampling.groups {
            let source = set.groups.get(key);
            let columns = set
                .features
                .iter()
                .enumerate()
                .map(|(i, (_, dtype))| self.column(source, &target.timestamps, i, *dtype))
                .collect();
            out.groups.insert(key.clone(), target.with_columns(columns));
        }
        Ok(single_output(out))
    }
}

pub struct FilterKernel;

impl Implementation<EventSet> for FilterKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let condition = input(operator, inputs, "condition")?;

        let mut out = EventSet::new(set.features.clone(), set.index.clone());
        for (key, group) in &set.groups {
            let mask = match condition.groups.get(key).and_then(|g| g.columns.first()) {
                Some(Column::Boolean(mask)) if mask.len() == group.len() => mask,
                _ => return Err(KernelError::new(operator.key(), format!("no boolean condition for index key {:?}", key))),
            };
            let rows: Vec<usize> = mask.iter().enumerate().filter(|&(_, &keep)| keep).map(|(i, _)| i).collect();
            let timestamps: Arc<[f64]> = rows.iter().map(|&i| group.timestamps[i]).collect();
            let columns = group.columns.iter().map(|c| c.take(&rows)).collect();
            out.groups.insert(key.clone(), IndexGroup { timestamps, columns });
        }
        Ok(single_output(out))
    }
}

pub struct LagKernel {
    duration: f64,
}

impl LagKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        Ok(Self { duration: number_attribute(operator, "duration")? })
    }
}

impl Implementation<EventSet> for LagKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let mut out = EventSet::new(set.features.clone(), set.index.clone());
        for (key, group) in &set.groups {
            let timestamps: Arc<[f64]> = group.timestamps.iter().map(|t| t + self.duration).collect();
            out.groups.insert(key.clone(), IndexGroup { timestamps, columns: group.columns.clone() });
        }
        Ok(single_output(out))
    }
}

pub struct TimestampsKernel;

impl Implementation<EventSet> for TimestampsKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let mut out = EventSet::new(vec![("timestamps".to_string(), DType::Float64)], set.index.clone());
        for (key, group) in &set.groups {
            let column = Column::Float64(group.timestamps.to_vec());
            out.groups.insert(key.clone(), group.with_columns(vec![column]));
        }
        Ok(single_output(out))
    }
}

pub struct UniqueTimestampsKernel;

impl Implementation<EventSet> for UniqueTimestampsKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let mut out = EventSet::new(Vec::new(), set.index.clone());
        for (key, group) in &set.groups {
            let mut timestamps = group.timestamps.to_vec();
            timestamps.dedup();
            out.groups.insert(key.clone(), IndexGroup { timestamps: timestamps.into(), columns: Vec::new() });
        }
        Ok(single_output(out))
    }
}

pub fn register(builder: &mut ImplementationRegistryBuilder<EventSet>, operators: &OperatorRegistry) -> Result<(), RegistryError> {
    for op in WindowOp::ALL {
        register_kernel(builder, operators, op.key(), move |o| Ok(Box::new(WindowKernel::new(op, o)?)))?;
    }
    register_kernel(builder, operators, FILTER, |_| Ok(Box::new(FilterKernel)))?;
    register_kernel(builder, operators, LAG, |o| Ok(Box::new(LagKernel::new(o)?)))?;
    register_kernel(builder, operators, TIMESTAMPS, |_| Ok(Box::new(TimestampsKernel)))?;
    register_kernel(builder, operators, UNIQUE_TIMESTAMPS, |_| Ok(Box::new(UniqueTimestampsKernel)))
}
