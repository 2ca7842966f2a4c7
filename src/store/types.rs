use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn index(&self) -> usize { self.0 as usize }
            pub fn new(idx: usize) -> Self { Self(idx as u32) }
        }
    };
}

arena_id!(
    /// Stable handle of an `EventSetNode` inside a `GraphStore`.
    NodeId
);
arena_id!(
    /// Identity of a sampling. Two nodes are aligned iff their ids are equal.
    SamplingId
);
arena_id!(
    /// Handle of an operator instance; also its declaration order.
    OperatorId
);

/// Scalar type of a feature or index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    Float64,
    Float32,
    Int64,
    Int32,
    String,
    Boolean,
}

impl DType {
    pub const ALL: [DType; 6] = [
        DType::Float64,
        DType::Float32,
        DType::Int64,
        DType::Int32,
        DType::String,
        DType::Boolean,
    ];

    pub fn is_float(&self) -> bool { matches!(self, DType::Float64 | DType::Float32) }
    pub fn is_integer(&self) -> bool { matches!(self, DType::Int64 | DType::Int32) }
    pub fn is_numeric(&self) -> bool { self.is_float() || self.is_integer() }

    /// Index columns may only hold integers or strings.
    pub fn is_index_compatible(&self) -> bool {
        matches!(self, DType::Int64 | DType::Int32 | DType::String)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DType::Float64 => "FLOAT64",
            DType::Float32 => "FLOAT32",
            DType::Int64 => "INT64",
            DType::Int32 => "INT32",
            DType::String => "STRING",
            DType::Boolean => "BOOLEAN",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexLevel {
    pub name: String,
    pub dtype: DType,
}

impl IndexLevel {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self { name: name.into(), dtype }
    }
}

/// A named, typed column. Its sampling is the sampling of the owning node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub(crate) name: String,
    pub(crate) dtype: DType,
    pub(crate) creator: Option<OperatorId>,
}

impl Feature {
    pub fn name(&self) -> &str { &self.name }
    pub fn dtype(&self) -> DType { self.dtype }
    /// `None` for features declared on a graph input.
    pub fn creator(&self) -> Option<OperatorId> { self.creator }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sampling {
    pub(crate) index: Vec<IndexLevel>,
    pub(crate) is_unix_timestamp: bool,
    pub(crate) creator: Option<OperatorId>,
}

impl Sampling {
    pub fn index(&self) -> &[IndexLevel] { &self.index }
    pub fn index_names(&self) -> impl Iterator<Item = &str> { self.index.iter().map(|l| l.name.as_str()) }
    pub fn is_unix_timestamp(&self) -> bool { self.is_unix_timestamp }
    pub fn creator(&self) -> Option<OperatorId> { self.creator }
}

/// Schema-only description of the data flowing on one graph edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSetNode {
    pub(crate) name: Option<String>,
    pub(crate) features: Vec<Feature>,
    pub(crate) sampling: SamplingId,
    pub(crate) creator: Option<OperatorId>,
}

impl EventSetNode {
    pub fn name(&self) -> Option<&str> { self.name.as_deref() }
    pub fn features(&self) -> &[Feature] { &self.features }
    pub fn sampling(&self) -> SamplingId { self.sampling }
    pub fn creator(&self) -> Option<OperatorId> { self.creator }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Value of an operator attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Integer(i64),
    Float(f64),
    String(String),
    Bool(bool),
    StringList(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    Integer,
    Float,
    /// Either an `Integer` or a `Float`.
    Number,
    String,
    Bool,
    StringList,
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::StringList(_) => "string list",
        }
    }

    pub fn conforms_to(&self, ty: AttributeType) -> bool {
        matches!(
            (self, ty),
            (AttributeValue::Integer(_), AttributeType::Integer | AttributeType::Number)
                | (AttributeValue::Float(_), AttributeType::Float | AttributeType::Number)
                | (AttributeValue::String(_), AttributeType::String)
                | (AttributeValue::Bool(_), AttributeType::Bool)
                | (AttributeValue::StringList(_), AttributeType::StringList)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self { AttributeValue::Integer(v) => Some(*v), _ => None }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { AttributeValue::String(v) => Some(v), _ => None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self { AttributeValue::Bool(v) => Some(*v), _ => None }
    }

    pub fn as_strings(&self) -> Option<&[String]> {
        match self { AttributeValue::StringList(v) => Some(v), _ => None }
    }
}

impl From<i64> for AttributeValue { fn from(v: i64) -> Self { AttributeValue::Integer(v) } }
impl From<i32> for AttributeValue { fn from(v: i32) -> Self { AttributeValue::Integer(v as i64) } }
impl From<f64> for AttributeValue { fn from(v: f64) -> Self { AttributeValue::Float(v) } }
impl From<bool> for AttributeValue { fn from(v: bool) -> Self { AttributeValue::Bool(v) } }
impl From<&str> for AttributeValue { fn from(v: &str) -> Self { AttributeValue::String(v.to_string()) } }
impl From<String> for AttributeValue { fn from(v: String) -> Self { AttributeValue::String(v) } }
impl From<Vec<String>> for AttributeValue { fn from(v: Vec<String>) -> Self { AttributeValue::StringList(v) } }

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(v) => write!(f, "{:?}", v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::StringList(v) => write!(f, "{:?}", v),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Ordered `(slot, node)` pairs of an operator.
pub type SlotMap = SmallVec<[(String, NodeId); 2]>;

/// An operator instance bound to concrete nodes and attribute values.
///
/// Built once by `GraphStore::apply` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub(crate) key: String,
    pub(crate) inputs: SlotMap,
    pub(crate) outputs: SlotMap,
    pub(crate) attributes: Attributes,
}

impl Operator {
    pub fn key(&self) -> &str { &self.key }
    pub fn inputs(&self) -> &[(String, NodeId)] { &self.inputs }
    pub fn outputs(&self) -> &[(String, NodeId)] { &self.outputs }
    pub fn attributes(&self) -> &Attributes { &self.attributes }

    pub fn input(&self, slot: &str) -> Option<NodeId> {
        self.inputs.iter().find(|(s, _)| s == slot).map(|(_, n)| *n)
    }

    pub fn output(&self, slot: &str) -> Option<NodeId> {
        self.outputs.iter().find(|(s, _)| s == slot).map(|(_, n)| *n)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if !self.attributes.is_empty() {
            let attrs: Vec<String> = self.attributes.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, "({})", attrs.join(", "))?;
        }
        Ok(())
    }
}

/// Declaration of a graph input node.
#[derive(Debug, Clone, Default)]
pub struct InputSpec {
    pub(crate) name: Option<String>,
    pub(crate) features: Vec<(String, DType)>,
    pub(crate) index: Vec<IndexLevel>,
    pub(crate) is_unix_timestamp: bool,
    pub(crate) same_sampling_as: Option<NodeId>,
}

impl InputSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Default::default() }
    }

    pub fn unnamed() -> Self { Self::default() }

    pub fn feature(mut self, name: impl Into<String>, dtype: DType) -> Self {
        self.features.push((name.into(), dtype));
        self
    }

    pub fn index(mut self, name: impl Into<String>, dtype: DType) -> Self {
        self.index.push(IndexLevel::new(name, dtype));
        self
    }

    pub fn unix_timestamps(mut self, yes: bool) -> Self {
        self.is_unix_timestamp = yes;
        self
    }

    /// Reuse the sampling identity of an existing node instead of declaring a new one.
    pub fn same_sampling_as(mut self, node: NodeId) -> Self {
        self.same_sampling_as = Some(node);
        self
    }
}
