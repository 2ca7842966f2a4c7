//! Kernels that move columns around: selection, renaming, glue, index changes and joins.
use super::event_set::{Column, EventSet, IndexGroup, IndexKey, IndexValue};
use super::{input, register_kernel, single_output};
use crate::compute::{Implementation, ImplementationRegistryBuilder, Inputs, KernelError, Outputs};
use crate::ops::index::{ADD_INDEX, DROP_INDEX};
use crate::ops::join::JOIN;
use crate::ops::registry::{OperatorRegistry, RegistryError};
use crate::ops::structure::{glue_slot, GLUE, MAX_GLUE_INPUTS, PREFIX, SELECT};
use crate::store::{AttributeValue, IndexLevel, Operator};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

fn string_list(operator: &Operator, key: &str) -> Result<Vec<String>, KernelError> {
    operator
        .attribute(key)
        .and_then(AttributeValue::as_strings)
        .map(<[String]>::to_vec)
        .ok_or_else(|| KernelError::new(operator.key(), format!("missing string list '{}'", key)))
}

fn position(operator: &Operator, set: &EventSet, name: &str) -> Result<usize, KernelError> {
    set.feature_position(name)
        .ok_or_else(|| KernelError::new(operator.key(), format!("feature '{}' is not in the input", name)))
}

pub struct SelectKernel {
    names: Vec<String>,
}

impl SelectKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        Ok(Self { names: string_list(operator, "feature_names")? })
    }
}

impl Implementation<EventSet> for SelectKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let positions = self.names.iter().map(|n| position(operator, set, n)).collect::<Result<Vec<_>, _>>()?;
        let features = positions.iter().map(|&p| set.features[p].clone()).collect();
        let mut out = EventSet::new(features, set.index.clone());
        for (key, group) in &set.groups {
            let columns = positions.iter().map(|&p| group.columns[p].clone()).collect();
            out.groups.insert(key.clone(), group.with_columns(columns));
        }
        Ok(single_output(out))
    }
}

pub struct PrefixKernel {
    prefix: String,
}

impl PrefixKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        let prefix = operator
            .attribute("prefix")
            .and_then(AttributeValue::as_str)
            .ok_or_else(|| KernelError::new(operator.key(), "missing string 'prefix'"))?;
        Ok(Self { prefix: prefix.to_string() })
    }
}

impl Implementation<EventSet> for PrefixKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let mut out = set.clone();
        for (name, _) in &mut out.features {
            *name = format!("{}{}", self.prefix, name);
        }
        Ok(single_output(out))
    }
}

pub struct GlueKernel;

impl Implementation<EventSet> for GlueKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let parts: Vec<&EventSet> =
            (0..MAX_GLUE_INPUTS).map_while(|i| inputs.get(glue_slot(i).as_str()).copied()).collect();
        let first = input(operator, inputs, "input_0")?;

        let features = parts.iter().flat_map(|p| p.features.iter().cloned()).collect();
        let mut out = EventSet::new(features, first.index.clone());
        for (key, group) in &first.groups {
            let mut columns = Vec::new();
            for (i, part) in parts.iter().enumerate() {
                let other = part.groups.get(key).ok_or_else(|| {
                    KernelError::new(operator.key(), format!("index key {:?} missing from {}", key, glue_slot(i)))
                })?;
                columns.extend(other.columns.iter().cloned());
            }
            out.groups.insert(key.clone(), group.with_columns(columns));
        }
        Ok(single_output(out))
    }
}

pub struct AddIndexKernel {
    indexes: Vec<String>,
}

impl AddIndexKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        Ok(Self { indexes: string_list(operator, "indexes")? })
    }
}

impl Implementation<EventSet> for AddIndexKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let index_positions = self.indexes.iter().map(|n| position(operator, set, n)).collect::<Result<Vec<_>, _>>()?;
        let kept: Vec<usize> = (0..set.features.len()).filter(|p| !index_positions.contains(p)).collect();

        let mut index = set.index.clone();
        index.extend(index_positions.iter().map(|&p| IndexLevel::new(&set.features[p].0, set.features[p].1)));
        let features = kept.iter().map(|&p| set.features[p].clone()).collect();
        let mut out = EventSet::new(features, index);

        for (key, group) in &set.groups {
            // Rows of each new key, in timestamp order.
            let mut buckets: BTreeMap<IndexKey, Vec<usize>> = BTreeMap::new();
            for row in 0..group.len() {
                let mut new_key = key.clone();
                for &p in &index_positions {
                    let value = group.columns[p].index_value(row).ok_or_else(|| {
                        KernelError::new(operator.key(), format!("feature '{}' cannot be used as an index", set.features[p].0))
                    })?;
                    new_key.push(value);
                }
                buckets.entry(new_key).or_default().push(row);
            }
            for (new_key, rows) in buckets {
                let timestamps: Arc<[f64]> = rows.iter().map(|&r| group.timestamps[r]).collect();
                let columns = kept.iter().map(|&p| group.columns[p].take(&rows)).collect();
                out.groups.insert(new_key, IndexGroup { timestamps, columns });
            }
        }
        Ok(single_output(out))
    }
}

pub struct DropIndexKernel {
    indexes: Vec<String>,
    keep: bool,
}

impl DropIndexKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        let keep = operator
            .attribute("keep")
            .and_then(AttributeValue::as_bool)
            .ok_or_else(|| KernelError::new(operator.key(), "missing bool 'keep'"))?;
        Ok(Self { indexes: string_list(operator, "indexes")?, keep })
    }
}

impl Implementation<EventSet> for DropIndexKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let set = input(operator, inputs, "input")?;
        let level = |name: &str| {
            set.index
                .iter()
                .position(|l| l.name == name)
                .ok_or_else(|| KernelError::new(operator.key(), format!("'{}' is not an index level", name)))
        };
        let dropped = self.indexes.iter().map(|n| level(n.as_str())).collect::<Result<Vec<_>, _>>()?;
        let remaining: Vec<usize> = (0..set.index.len()).filter(|i| !dropped.contains(i)).collect();

        let mut features = Vec::new();
        if self.keep {
            features.extend(dropped.iter().map(|&i| (set.index[i].name.clone(), set.index[i].dtype)));
        }
        features.extend(set.features.iter().cloned());
        let index = remaining.iter().map(|&i| set.index[i].clone()).collect();
        let mut out = EventSet::new(features, index);

        // Old groups merged into each new key, in old key order.
        let mut merged: BTreeMap<IndexKey, Vec<(&IndexKey, &IndexGroup)>> = BTreeMap::new();
        for (key, group) in &set.groups {
            let new_key = remaining.iter().map(|&i| key[i].clone()).collect();
            merged.entry(new_key).or_default().push((key, group));
        }

        for (new_key, sources) in merged {
            let mut rows: Vec<(f64, usize, usize)> = sources
                .iter()
                .enumerate()
                .flat_map(|(s, &(_, g))| g.timestamps.iter().enumerate().map(move |(r, &t)| (t, s, r)))
                .collect();
            // Stable, so equal timestamps keep the old key order.
            rows.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut columns = Vec::with_capacity(out.features.len());
            if self.keep {
                for &i in &dropped {
                    let values: Vec<&IndexValue> = rows.iter().map(|&(_, s, _)| &sources[s].0[i]).collect();
                    columns.push(index_column(&set.index[i], &values));
                }
            }
            for (p, (_, dtype)) in set.features.iter().enumerate() {
                let picked: Vec<(&Column, usize)> = rows.iter().map(|&(_, s, r)| (&sources[s].1.columns[p], r)).collect();
                columns.push(Column::gather(*dtype, &picked));
            }
            let timestamps: Arc<[f64]> = rows.iter().map(|&(t, _, _)| t).collect();
            out.groups.insert(new_key, IndexGroup { timestamps, columns });
        }
        Ok(single_output(out))
    }
}

fn index_column(level: &IndexLevel, values: &[&IndexValue]) -> Column {
    let singles: Vec<Column> = values.iter().map(|v| Column::repeat_index(level.dtype, v, 1)).collect();
    let rows: Vec<(&Column, usize)> = singles.iter().map(|c| (c, 0)).collect();
    Column::gather(level.dtype, &rows)
}

pub struct JoinKernel {
    on: Option<String>,
}

impl JoinKernel {
    pub fn new(operator: &Operator) -> Result<Self, KernelError> {
        Ok(Self { on: operator.attribute("on").and_then(AttributeValue::as_str).map(str::to_string) })
    }

    fn on_values(&self, operator: &Operator, set: &EventSet, group: &IndexGroup) -> Result<Option<Vec<i64>>, KernelError> {
        let Some(on) = &self.on else { return Ok(None) };
        let column = &group.columns[position(operator, set, on)?];
        let values = match column {
            Column::Int64(v) => v.clone(),
            Column::Int32(v) => v.iter().map(|&x| x as i64).collect(),
            other => {
                return Err(KernelError::new(operator.key(), format!("'on' feature has dtype {}", other.dtype())));
            }
        };
        Ok(Some(values))
    }
}

impl Implementation<EventSet> for JoinKernel {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, EventSet>) -> Result<Outputs<EventSet>, KernelError> {
        let left = input(operator, inputs, "left")?;
        let right = input(operator, inputs, "right")?;
        let right_positions: Vec<usize> = right
            .features
            .iter()
            .enumerate()
            .filter(|(_, (n, _))| Some(n) != self.on.as_ref())
            .map(|(p, _)| p)
            .collect();

        let mut features = left.features.clone();
        features.extend(right_positions.iter().map(|&p| right.features[p].clone()));
        let mut out = EventSet::new(features, left.index.clone());

        for (key, group) in &left.groups {
            let mut columns = group.columns.clone();
            let other = right.groups.get(key);
            let matches: Vec<Option<usize>> = match other {
                Some(other) => {
                    // First right row for each (timestamp, on) pair.
                    let right_on = self.on_values(operator, right, other)?;
                    let mut first: HashMap<(u64, i64), usize> = HashMap::new();
                    for (r, t) in other.timestamps.iter().enumerate() {
                        let on = right_on.as_ref().map_or(0, |v| v[r]);
                        first.entry((t.to_bits(), on)).or_insert(r);
                    }
                    let left_on = self.on_values(operator, left, group)?;
                    group
                        .timestamps
                        .iter()
                        .enumerate()
                        .map(|(l, t)| first.get(&(t.to_bits(), left_on.as_ref().map_or(0, |v| v[l]))).copied())
                        .collect()
                }
                None => vec![None; group.len()],
            };
            columns.extend(right_positions.iter().map(|&p| match other {
                Some(other) => other.columns[p].take_or_missing(&matches),
                None => Column::empty(right.features[p].1).take_or_missing(&matches),
            }));
            out.groups.insert(key.clone(), group.with_columns(columns));
        }
        Ok(single_output(out))
    }
}

pub fn register(builder: &mut ImplementationRegistryBuilder<EventSet>, operators: &OperatorRegistry) -> Result<(), RegistryError> {
    register_kernel(builder, operators, SELECT, |o| Ok(Box::new(SelectKernel::new(o)?)))?;
    register_kernel(builder, operators, PREFIX, |o| Ok(Box::new(PrefixKernel::new(o)?)))?;
    register_kernel(builder, operators, GLUE, |_| Ok(Box::new(GlueKernel)))?;
    register_kernel(builder, operators, ADD_INDEX, |o| Ok(Box::new(AddIndexKernel::new(o)?)))?;
    register_kernel(builder, operators, DROP_INDEX, |o| Ok(Box::new(DropIndexKernel::new(o)?)))?;
    register_kernel(builder, operators, JOIN, |o| Ok(Box::new(JoinKernel::new(o)?)))
}
