//! Per-event kernels: arithmetic, comparisons, scalars, unary ops, calendar fields and casts.
use super::event_set::{Column, EventSet};
use super::{input, register_kernel, single_output};
use crate::compute::{Implementation, ImplementationRegistryBuilder, Inputs, KernelError, Outputs};
use crate::ops::registry::{OperatorRegistry, RegistryError};
use crate::ops::structure::CAST;
use crate::ops::{BinaryOp, CalendarUnit, ScalarOp, UnaryOp};
use crate::store::{AttributeValue, DType, Operator};
use std::cmp::Ordering;
use wide::f64x4;

/// Float64 arithmetic in lanes of four.
fn simd_f64(op: BinaryOp, a: &[f64], b: &[f64]) -> Vec<f64> {
    let apply = |x: f64x4, y: f64x4| match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        _ => x / y,
    };
    let mut out = Vec::with_capacity(a.len());
    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        let x = f64x4::from([ca[0], ca[1], ca[2], ca[3]]);
        let y = f64x4::from([cb[0], cb[1], cb[2], cb[3]]);
        out.extend_from_slice(&apply(x, y).to_array());
    }
    for (&x, &y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        let lane = apply(f64x4::splat(x), f64x4::splat(y)).to_array();
        out.push(lane[0]);
    }
    out
}

macro_rules! float_arith {
    ($name:ident, $t:ty) => {
        fn $name(op: BinaryOp, a: &[$t], b: &[$t]) -> Result<Vec<$t>, String> {
            Ok(a.iter()
                .zip(b)
                .map(|(&x, &y)| match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::FloorDiv => (x / y).floor(),
                    // Result takes the sign of the divisor.
                    BinaryOp::Mod => x - y * (x / y).floor(),
                    BinaryOp::Pow => x.powf(y),
                    _ => <$t>::NAN,
                })
                .collect())
        }
    };
}

macro_rules! int_arith {
    ($name:ident, $t:ty) => {
        fn $name(op: BinaryOp, a: &[$t], b: &[$t]) -> Result<Vec<$t>, String> {
            a.iter()
                .zip(b)
                .map(|(&x, &y)| {
                    Ok(match op {
                        BinaryOp::Add => x.wrapping_add(y),
                        BinaryOp::Sub => x.wrapping_sub(y),
                        BinaryOp::Mul => x.wrapping_mul(y),
                        BinaryOp::FloorDiv if y == 0 => 0,
                        BinaryOp::FloorDiv => {
                            let q = x.wrapping_div(y);
                            if x.wrapping_rem(y) != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q }
                        }
                        BinaryOp::Mod if y == 0 => 0,
                        BinaryOp::Mod => {
                            let r = x.wrapping_rem(y);
                            if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r }
                        }
                        BinaryOp::Pow if y < 0 => return Err(format!("negative integer exponent {}", y)),
                        BinaryOp::Pow => {
                            let exp = u32::try_from(y).map_err(|_| format!("integer exponent {} is too large", y))?;
                            x.wrapping_pow(exp)
                        }
                        _ => return Err(format!("{} is not defined for integers", op.key())),
                    })
                })
                .collect()
        }
    };
}

float_arith!(arith_f64, f64);
float_arith!(arith_f32, f32);
int_arith!(arith_i64, i64);
int_arith!(arith_i32, i32);

fn arithmetic(op: BinaryOp, a: &Column, b: &Column) -> Result<Column, String> {
    Ok(match (a, b) {
        (Column::Float64(x), Column::Float64(y)) if matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div) => {
            Column::Float64(simd_f64(op, x, y))
        }
        (Column::Float64(x), Column::Float64(y)) => Column::Float64(arith_f64(op, x, y)?),
        (Column::Float32(x), Column::Float32(y)) => Column::Float32(arith_f32(op, x, y)?),
        (Column::Int64(x), Column::Int64(y)) => Column::Int64(arith_i64(op, x, y)?),
        (Column::Int32(x), Column::Int32(y)) => Column::Int32(arith_i32(op, x, y)?),
        _ => return Err(format!("{} needs two numeric columns of one dtype, got {} and {}", op.key(), a.dtype(), b.dtype())),
    })
}

fn relation(op: BinaryOp, ord: Option<Ordering>) -> bool {
    match op {
        BinaryOp::Eq => ord == Some(Ordering::Equal),
        // NaN compares unequal to everything.
        BinaryOp::Ne => ord != Some(Ordering::Equal),
        BinaryOp::Gt => ord == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        BinaryOp::Lt => ord == Some(Ordering::Less),
        BinaryOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        _ => false,
    }
}

fn compare_slices<T: PartialOrd>(op: BinaryOp, a: &[T], b: &[T]) -> Vec<bool> {
    a.iter().zip(b).map(|(x, y)| relation(op, x.partial_cmp(y))).collect()
}

fn comparison(op: BinaryOp, a: &Column, b: &Column) -> Result<Column, String> {
    Ok(Column::Boolean(match (a, b) {
        (Column::Float64(x), Column::Float64(y)) => compare_slices(op, x, y),
        (Column::Float32(x), Column::Float32(y)) => compare_slices(op, x, y),
        (Column::Int64(x), Column::Int64(y)) => compare_slices(op, x, y),
        (Column::Int32(x), Column::Int32(y)) => compare_slices(op, x, y),
        (Column::String(x), Column::String(y)) => compare_slices(op, x, y),
        (Column::Boolean(x), Column::Boolean(y)) => compare_slices(op, x, y),
        _ => return Err(format!("cannot compare {} with {}", a.dtype(), b.dtype())),
    }))
}

fn apply_binary(op: BinaryOp, a: &Column, b: &Column) -> Result<Column, String> {
    if op.is_relational() {
        comparison(op, a, b)
    } else {
        arithmetic(op, a, b)
    }
}

/// Applies `f` to every column of every group, keeping the timestamps.
fn map_columns<F>(operator: &Operator, set: &EventSet, features: Vec<(String, DType)>, mut f: F) -> Result<EventSet, KernelError>
where
    F: FnMut(&Column) -> Result<Column, String>,
{
    let mut out = EventSet::new(features, set.index.clone());
    for (key, group) in &set.groups {
        let columns = group
            .columns
            .iter()
            .map(&mut f)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|m| KernelError::new(operator.key(), m))?;
        out.groups.insert(key.clone(), group.with_columns(columns));
    }
    Ok(out)
}

pub struct BinaryKernel(pub BinaryOp);

impl Implementation<EventSet> for BinaryKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let left = input(operator, inputs, "input_1")?;
        let right = input(operator, inputs, "input_2")?;
        let features = left
            .features
            .iter()
            .zip(&right.features)
            .map(|((l, dtype), (r, _))| {
                let dtype = if self.0.is_relational() { DType::Boolean } else { *dtype };
                (format!("{}_{}_{}", self.0.prefix(), l, r), dtype)
            })
            .collect();

        let mut out = EventSet::new(features, left.index.clone());
        for (key, group) in &left.groups {
            let other = right
                .groups
                .get(key)
                .ok_or_else(|| KernelError::new(operator.key(), format!("index key {:?} missing from input_2", key)))?;
            let columns = group
                .columns
                .iter()
                .zip(&other.columns)
                .map(|(a, b)| apply_binary(self.0, a, b))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|m| KernelError::new(operator.key(), m))?;
            out.groups.insert(key.clone(), group.with_columns(columns));
        }
        Ok(single_output(out))
    }
}

pub struct ScalarKernel {
    op: ScalarOp,
    value: AttributeValue,
    is_value_first: bool,
}

impl ScalarKernel {
    pub fn new(op: ScalarOp, operator: &Operator) -> Result<Self, KernelError> {
        let value = operator
            .attribute("value")
            .filter(|v| v.as_f64().is_some())
            .cloned()
            .ok_or_else(|| KernelError::new(operator.key(), "missing numeric 'value'"))?;
        let is_value_first = operator.attribute("is_value_first").and_then(AttributeValue::as_bool).unwrap_or(false);
        Ok(Self { op, value, is_value_first })
    }

    fn binary_op(&self) -> BinaryOp {
        match self.op {
            ScalarOp::Add => BinaryOp::Add,
            ScalarOp::Sub => BinaryOp::Sub,
            ScalarOp::Mul => BinaryOp::Mul,
            ScalarOp::Div => BinaryOp::Div,
            ScalarOp::Gt => BinaryOp::Gt,
            ScalarOp::Lt => BinaryOp::Lt,
            ScalarOp::Eq => BinaryOp::Eq,
        }
    }

    /// The value broadcast to `len` rows of `dtype`.
    fn constant(&self, dtype: DType, len: usize) -> Result<Column, String> {
        Ok(match (&self.value, dtype) {
            (AttributeValue::Integer(v), DType::Int64) => Column::Int64(vec![*v; len]),
            (AttributeValue::Integer(v), DType::Int32) => {
                let v = i32::try_from(*v).map_err(|_| format!("value {} does not fit INT32", v))?;
                Column::Int32(vec![v; len])
            }
            (v, dtype) => Column::from_f64(dtype, vec![v.as_f64().unwrap_or(f64::NAN); len]),
        })
    }

    fn apply(&self, column: &Column) -> Result<Column, String> {
        let op = self.binary_op();
        let (a, b) = if op.is_relational() {
            // Compare on floats so an integer feature can meet a float value.
            let values = column.to_f64().ok_or_else(|| format!("{} is not numeric", column.dtype()))?;
            let constant = Column::Float64(vec![self.value.as_f64().unwrap_or(f64::NAN); values.len()]);
            (Column::Float64(values), constant)
        } else {
            (column.clone(), self.constant(column.dtype(), column.len())?)
        };
        if self.is_value_first {
            apply_binary(op, &b, &a)
        } else {
            apply_binary(op, &a, &b)
        }
    }
}

impl Implementation<EventSet> for ScalarKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let relational = self.op.is_relational();
        let features = set
            .features
            .iter()
            .map(|(n, d)| (n.clone(), if relational { DType::Boolean } else { *d }))
            .collect();
        Ok(single_output(map_columns(operator, set, features, |c| self.apply(c))?))
    }
}

pub struct UnaryKernel(pub UnaryOp);

impl Implementation<EventSet> for UnaryKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let out = map_columns(operator, set, set.features.clone(), |column| {
            Ok(match (self.0, column) {
                (UnaryOp::Invert, Column::Boolean(v)) => Column::Boolean(v.iter().map(|x| !x).collect()),
                (UnaryOp::Abs, Column::Float64(v)) => Column::Float64(v.iter().map(|x| x.abs()).collect()),
                (UnaryOp::Abs, Column::Float32(v)) => Column::Float32(v.iter().map(|x| x.abs()).collect()),
                (UnaryOp::Abs, Column::Int64(v)) => Column::Int64(v.iter().map(|x| x.wrapping_abs()).collect()),
                (UnaryOp::Abs, Column::Int32(v)) => Column::Int32(v.iter().map(|x| x.wrapping_abs()).collect()),
                (op, c) => return Err(format!("{} is not defined for {}", op.key(), c.dtype())),
            })
        })?;
        Ok(single_output(out))
    }
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn day_of_year(year: i64, month: u32, day: u32) -> u32 {
    const CUMULATIVE: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let leap = if month > 2 && is_leap(year) { 1 } else { 0 };
    CUMULATIVE[(month - 1) as usize] + day + leap
}

/// Monday is 0. 1970-01-01 was a Thursday.
fn day_of_week(days: i64) -> u32 {
    (days + 3).rem_euclid(7) as u32
}

fn iso_week(days: i64) -> u32 {
    // The ISO week belongs to the year holding its Thursday.
    let thursday = days - day_of_week(days) as i64 + 3;
    let (year, month, day) = civil_from_days(thursday);
    (day_of_year(year, month, day) - 1) / 7 + 1
}

pub fn calendar_field(unit: CalendarUnit, timestamp: f64) -> i32 {
    let seconds = timestamp.floor() as i64;
    let days = seconds.div_euclid(86_400);
    let in_day = seconds.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    match unit {
        CalendarUnit::Second => (in_day % 60) as i32,
        CalendarUnit::Minute => (in_day / 60 % 60) as i32,
        CalendarUnit::Hour => (in_day / 3600) as i32,
        CalendarUnit::DayOfWeek => day_of_week(days) as i32,
        CalendarUnit::DayOfMonth => day as i32,
        CalendarUnit::DayOfYear => day_of_year(year, month, day) as i32,
        CalendarUnit::IsoWeek => iso_week(days) as i32,
        CalendarUnit::Month => month as i32,
        CalendarUnit::Year => year as i32,
    }
}

pub struct CalendarKernel(pub CalendarUnit);

impl Implementation<EventSet> for CalendarKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let mut out = EventSet::new(vec![(self.0.feature_name().to_string(), DType::Int32)], set.index.clone());
        for (key, group) in &set.groups {
            let values = group.timestamps.iter().map(|&t| calendar_field(self.0, t)).collect();
            out.groups.insert(key.clone(), group.with_columns(vec![Column::Int32(values)]));
        }
        Ok(single_output(out))
    }
}

pub struct CastKernel(pub DType);

impl CastKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        operator
            .attribute("dtype")
            .and_then(AttributeValue::as_str)
            .and_then(DType::from_name)
            .map(Self)
            .ok_or_else(|| KernelError::new(operator.key(), "missing or unknown 'dtype'"))
    }
}

impl Implementation<EventSet> for CastKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let features = set.features.iter().map(|(n, _)| (n.clone(), self.0)).collect();
        Ok(single_output(map_columns(operator, set, features, |c| c.cast(self.0))?))
    }
}

pub fn register(builder: &mut ImplementationRegistryBuilder<EventSet>, operators: &OperatorRegistry) -> Result<(), RegistryError> {
    for op in BinaryOp::ALL {
        register_kernel(builder, operators, op.key(), move |_| Ok(Box::new(BinaryKernel(op))))?;
    }
    for op in ScalarOp::ALL {
        register_kernel(builder, operators, op.key(), move |o| Ok(Box::new(ScalarKernel::new(op, o)?)))?;
    }
    for op in UnaryOp::ALL {
        register_kernel(builder, operators, op.key(), move |_| Ok(Box::new(UnaryKernel(op))))?;
    }
    for unit in CalendarUnit::ALL {
        register_kernel(builder, operators, unit.key(), move |_| Ok(Box::new(CalendarKernel(unit))))?;
    }
    register_kernel(builder, operators, CAST, |o| Ok(Box::new(CastKernel::new(o)?)))
}
