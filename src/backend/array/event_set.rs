use crate::compute::EventData;
use crate::store::{DType, EventSetNode, GraphStore, IndexLevel};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventSetError {
    #[error("Expected {expected} columns, got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    #[error("Column '{feature}' has {actual} values for {expected} timestamps")]
    LengthMismatch { feature: String, expected: usize, actual: usize },

    #[error("Column '{feature}' holds {actual} values but the feature is {expected}")]
    DTypeMismatch { feature: String, expected: DType, actual: DType },

    #[error("Timestamps must be sorted and not NaN")]
    UnsortedTimestamps,

    #[error("Index key {key:?} does not match the index levels {levels:?}")]
    BadIndexKey { key: IndexKey, levels: Vec<String> },

    #[error("Only an event set with a single index group can take extra columns")]
    NotSingleGroup,
}

/// Value of one index level for one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexValue {
    Int(i64),
    Str(String),
}

impl IndexValue {
    fn matches(&self, dtype: DType) -> bool {
        match self {
            IndexValue::Int(_) => dtype.is_integer(),
            IndexValue::Str(_) => dtype == DType::String,
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Int(v) => write!(f, "{}", v),
            IndexValue::Str(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for IndexValue { fn from(v: i64) -> Self { IndexValue::Int(v) } }
impl From<&str> for IndexValue { fn from(v: &str) -> Self { IndexValue::Str(v.to_string()) } }

pub type IndexKey = Vec<IndexValue>;

/// Placeholder written where no value exists, e.g. an unmatched join row.
pub trait Missing {
    fn missing() -> Self;
}

impl Missing for f64 { fn missing() -> Self { f64::NAN } }
impl Missing for f32 { fn missing() -> Self { f32::NAN } }
impl Missing for i64 { fn missing() -> Self { 0 } }
impl Missing for i32 { fn missing() -> Self { 0 } }
impl Missing for String { fn missing() -> Self { String::new() } }
impl Missing for bool { fn missing() -> Self { false } }

/// Typed values of one feature in one index group.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    String(Vec<String>),
    Boolean(Vec<bool>),
}

/// Applies `$body` to the inner vector of any column variant, rebuilding the same variant.
macro_rules! map_column {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Float64($v) => Column::Float64($body),
            Column::Float32($v) => Column::Float32($body),
            Column::Int64($v) => Column::Int64($body),
            Column::Int32($v) => Column::Int32($body),
            Column::String($v) => Column::String($body),
            Column::Boolean($v) => Column::Boolean($body),
        }
    };
}

macro_rules! gather_variant {
    ($variant:ident, $rows:expr) => {
        Column::$variant(
            $rows
                .iter()
                .map(|(c, i)| match c {
                    Column::$variant(v) => v[*i].clone(),
                    _ => Missing::missing(),
                })
                .collect(),
        )
    };
}

impl Column {
    pub fn dtype(&self) -> DType {
        match self {
            Column::Float64(_) => DType::Float64,
            Column::Float32(_) => DType::Float32,
            Column::Int64(_) => DType::Int64,
            Column::Int32(_) => DType::Int32,
            Column::String(_) => DType::String,
            Column::Boolean(_) => DType::Boolean,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Float64(v) => v.len(),
            Column::Float32(v) => v.len(),
            Column::Int64(v) => v.len(),
            Column::Int32(v) => v.len(),
            Column::String(v) => v.len(),
            Column::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn empty(dtype: DType) -> Self {
        Self::gather(dtype, &[])
    }

    pub fn take(&self, rows: &[usize]) -> Self {
        map_column!(self, v => rows.iter().map(|&i| v[i].clone()).collect())
    }

    /// Like `take`, writing the missing value where `rows` has no index.
    pub fn take_or_missing(&self, rows: &[Option<usize>]) -> Self {
        map_column!(self, v => rows.iter().map(|r| r.map(|i| v[i].clone()).unwrap_or_else(Missing::missing)).collect())
    }

    /// Concatenates single rows picked from columns of the same dtype.
    pub fn gather(dtype: DType, rows: &[(&Column, usize)]) -> Self {
        match dtype {
            DType::Float64 => gather_variant!(Float64, rows),
            DType::Float32 => gather_variant!(Float32, rows),
            DType::Int64 => gather_variant!(Int64, rows),
            DType::Int32 => gather_variant!(Int32, rows),
            DType::String => gather_variant!(String, rows),
            DType::Boolean => gather_variant!(Boolean, rows),
        }
    }

    /// Numeric view. Booleans read as 0 and 1, strings have none.
    pub fn to_f64(&self) -> Option<Vec<f64>> {
        match self {
            Column::Float64(v) => Some(v.clone()),
            Column::Float32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::Int64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::Int32(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Column::Boolean(v) => Some(v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect()),
            Column::String(_) => None,
        }
    }

    /// Builds a column of `dtype` from floats. NaN becomes the missing value.
    pub fn from_f64(dtype: DType, values: Vec<f64>) -> Self {
        let int = |x: f64| if x.is_nan() { 0.0 } else { x };
        match dtype {
            DType::Float64 => Column::Float64(values),
            DType::Float32 => Column::Float32(values.into_iter().map(|x| x as f32).collect()),
            DType::Int64 => Column::Int64(values.into_iter().map(|x| int(x) as i64).collect()),
            DType::Int32 => Column::Int32(values.into_iter().map(|x| int(x) as i32).collect()),
            DType::Boolean => Column::Boolean(values.into_iter().map(|x| !x.is_nan() && x != 0.0).collect()),
            DType::String => Column::String(values.into_iter().map(|x| x.to_string()).collect()),
        }
    }

    pub fn cast(&self, target: DType) -> Result<Self, String> {
        if self.dtype() == target {
            return Ok(self.clone());
        }
        Ok(match (self, target) {
            (Column::Int64(v), DType::Int32) => Column::Int32(v.iter().map(|&x| x as i32).collect()),
            (Column::Int32(v), DType::Int64) => Column::Int64(v.iter().map(|&x| x as i64).collect()),
            (_, DType::String) => Column::String(self.display_values()),
            (Column::String(v), _) => parse_strings(v, target)?,
            _ => match self.to_f64() {
                Some(values) => Column::from_f64(target, values),
                None => return Err(format!("cannot cast {} to {}", self.dtype(), target)),
            },
        })
    }

    fn display_values(&self) -> Vec<String> {
        match self {
            Column::Float64(v) => v.iter().map(ToString::to_string).collect(),
            Column::Float32(v) => v.iter().map(ToString::to_string).collect(),
            Column::Int64(v) => v.iter().map(ToString::to_string).collect(),
            Column::Int32(v) => v.iter().map(ToString::to_string).collect(),
            Column::String(v) => v.clone(),
            Column::Boolean(v) => v.iter().map(ToString::to_string).collect(),
        }
    }

    /// Value usable as an index key, for integer and string columns.
    pub fn index_value(&self, row: usize) -> Option<IndexValue> {
        match self {
            Column::Int64(v) => v.get(row).map(|&x| IndexValue::Int(x)),
            Column::Int32(v) => v.get(row).map(|&x| IndexValue::Int(x as i64)),
            Column::String(v) => v.get(row).map(|x| IndexValue::Str(x.clone())),
            _ => None,
        }
    }

    /// `len` copies of an index value as a column of `dtype`.
    pub fn repeat_index(dtype: DType, value: &IndexValue, len: usize) -> Self {
        match (dtype, value) {
            (DType::Int32, IndexValue::Int(v)) => Column::Int32(vec![*v as i32; len]),
            (DType::String, IndexValue::Str(v)) => Column::String(vec![v.clone(); len]),
            (DType::String, IndexValue::Int(v)) => Column::String(vec![v.to_string(); len]),
            (_, IndexValue::Int(v)) => Column::Int64(vec![*v; len]),
            (_, IndexValue::Str(_)) => Column::String(vec![String::new(); len]),
        }
    }
}

fn parse_strings(values: &[String], target: DType) -> Result<Column, String> {
    fn parse<T: std::str::FromStr>(values: &[String], target: DType) -> Result<Vec<T>, String> {
        values
            .iter()
            .map(|s| s.trim().parse::<T>().map_err(|_| format!("cannot parse {:?} as {}", s, target)))
            .collect()
    }
    Ok(match target {
        DType::Float64 => Column::Float64(parse(values, target)?),
        DType::Float32 => Column::Float32(parse(values, target)?),
        DType::Int64 => Column::Int64(parse(values, target)?),
        DType::Int32 => Column::Int32(parse(values, target)?),
        DType::Boolean => Column::Boolean(parse(values, target)?),
        DType::String => Column::String(values.to_vec()),
    })
}

/// Events of one index key: sorted timestamps and one column per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexGroup {
    pub(crate) timestamps: Arc<[f64]>,
    pub(crate) columns: Vec<Column>,
}

impl IndexGroup {
    pub fn timestamps(&self) -> &[f64] { &self.timestamps }
    pub fn columns(&self) -> &[Column] { &self.columns }
    pub fn len(&self) -> usize { self.timestamps.len() }
    pub fn is_empty(&self) -> bool { self.timestamps.is_empty() }

    /// A group keeping these timestamps, so its sampling stays shared.
    pub(crate) fn with_columns(&self, columns: Vec<Column>) -> Self {
        Self { timestamps: Arc::clone(&self.timestamps), columns }
    }
}

/// Eager, in-memory event data for the array backend.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSet {
    pub(crate) features: Vec<(String, DType)>,
    pub(crate) index: Vec<IndexLevel>,
    pub(crate) groups: BTreeMap<IndexKey, IndexGroup>,
}

impl EventSet {
    pub fn new(features: Vec<(String, DType)>, index: Vec<IndexLevel>) -> Self {
        Self { features, index, groups: BTreeMap::new() }
    }

    /// Empty event set with the schema of `node`.
    pub fn for_node(store: &GraphStore, node: &EventSetNode) -> Self {
        let features = node.features().iter().map(|f| (f.name().to_string(), f.dtype())).collect();
        let index = store.sampling(node.sampling()).map(|s| s.index().to_vec()).unwrap_or_default();
        Self::new(features, index)
    }

    /// Unindexed event set from timestamps and named columns.
    pub fn from_columns(timestamps: Vec<f64>, columns: Vec<(&str, Column)>) -> Result<Self, EventSetError> {
        let features = columns.iter().map(|(n, c)| (n.to_string(), c.dtype())).collect();
        let set = Self::new(features, Vec::new());
        set.with_group(Vec::new(), timestamps, columns.into_iter().map(|(_, c)| c).collect())
    }

    pub fn with_group(mut self, key: IndexKey, timestamps: Vec<f64>, columns: Vec<Column>) -> Result<Self, EventSetError> {
        if key.len() != self.index.len() || key.iter().zip(&self.index).any(|(v, l)| !v.matches(l.dtype)) {
            return Err(EventSetError::BadIndexKey { key, levels: self.index.iter().map(|l| l.name.clone()).collect() });
        }
        if timestamps.iter().any(|t| t.is_nan()) || timestamps.windows(2).any(|w| w[0] > w[1]) {
            return Err(EventSetError::UnsortedTimestamps);
        }
        if columns.len() != self.features.len() {
            return Err(EventSetError::ColumnCount { expected: self.features.len(), actual: columns.len() });
        }
        for ((name, dtype), column) in self.features.iter().zip(&columns) {
            if column.dtype() != *dtype {
                return Err(EventSetError::DTypeMismatch { feature: name.clone(), expected: *dtype, actual: column.dtype() });
            }
            if column.len() != timestamps.len() {
                return Err(EventSetError::LengthMismatch {
                    feature: name.clone(),
                    expected: timestamps.len(),
                    actual: column.len(),
                });
            }
        }
        self.groups.insert(key, IndexGroup { timestamps: timestamps.into(), columns });
        Ok(self)
    }

    /// New unindexed event set over the same timestamps, holding `columns`.
    pub fn with_columns(&self, columns: Vec<(&str, Column)>) -> Result<Self, EventSetError> {
        let group = match (self.index.is_empty(), self.groups.get(&IndexKey::new())) {
            (true, Some(group)) if self.groups.len() == 1 => group,
            _ => return Err(EventSetError::NotSingleGroup),
        };
        let features: Vec<(String, DType)> = columns.iter().map(|(n, c)| (n.to_string(), c.dtype())).collect();
        for ((name, _), (_, column)) in features.iter().zip(&columns) {
            if column.len() != group.len() {
                return Err(EventSetError::LengthMismatch { feature: name.clone(), expected: group.len(), actual: column.len() });
            }
        }
        let group = group.with_columns(columns.into_iter().map(|(_, c)| c).collect());
        Ok(Self { features, index: Vec::new(), groups: BTreeMap::from([(Vec::new(), group)]) })
    }

    pub fn features(&self) -> &[(String, DType)] { &self.features }
    pub fn index(&self) -> &[IndexLevel] { &self.index }
    pub fn groups(&self) -> impl Iterator<Item = (&IndexKey, &IndexGroup)> { self.groups.iter() }
    pub fn group(&self, key: &[IndexValue]) -> Option<&IndexGroup> { self.groups.get(key) }
    pub fn num_events(&self) -> usize { self.groups.values().map(IndexGroup::len).sum() }

    pub fn feature_position(&self, name: &str) -> Option<usize> {
        self.features.iter().position(|(n, _)| n == name)
    }

    /// Column of feature `name` in the group `key`.
    pub fn column(&self, key: &[IndexValue], name: &str) -> Option<&Column> {
        let pos = self.feature_position(name)?;
        self.groups.get(key).and_then(|g| g.columns.get(pos))
    }
}

impl EventData for EventSet {
    fn check_schema(&self, store: &GraphStore, node: &EventSetNode) -> Result<(), String> {
        let expected: Vec<(&str, DType)> = node.features().iter().map(|f| (f.name(), f.dtype())).collect();
        let actual: Vec<(&str, DType)> = self.features.iter().map(|(n, d)| (n.as_str(), *d)).collect();
        if expected != actual {
            return Err(format!("features {:?} do not match the expected {:?}", actual, expected));
        }

        let index = store.sampling(node.sampling()).map(|s| s.index()).unwrap_or_default();
        if index != self.index.as_slice() {
            return Err(format!("index {:?} does not match the expected {:?}", self.index, index));
        }

        for (key, group) in &self.groups {
            if key.len() != index.len() || key.iter().zip(index).any(|(v, l)| !v.matches(l.dtype)) {
                return Err(format!("index key {:?} does not fit the index levels", key));
            }
            if group.columns.len() != expected.len() {
                return Err(format!("group {:?} has {} columns, expected {}", key, group.columns.len(), expected.len()));
            }
            for (column, (name, dtype)) in group.columns.iter().zip(&expected) {
                if column.dtype() != *dtype || column.len() != group.len() {
                    return Err(format!(
                        "column '{}' in group {:?} has {} {} values for {} events",
                        name,
                        key,
                        column.len(),
                        column.dtype(),
                        group.len()
                    ));
                }
            }
        }
        Ok(())
    }

    fn shares_sampling(&self, other: &Self) -> bool {
        self.groups.len() == other.groups.len()
            && self.groups.iter().zip(&other.groups).all(|((ka, ga), (kb, gb))| {
                ka == kb && (Arc::ptr_eq(&ga.timestamps, &gb.timestamps) || ga.timestamps == gb.timestamps)
            })
    }
}
