//! On-disk shape of a graph blob. Ids are local to the blob.
use crate::store::{Attributes, DType, IndexLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphProto {
    pub samplings: Vec<SamplingProto>,
    pub nodes: Vec<NodeProto>,
    pub operators: Vec<OperatorProto>,
    pub inputs: Vec<IoProto>,
    pub outputs: Vec<IoProto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingProto {
    pub index: Vec<IndexLevel>,
    pub is_unix_timestamp: bool,
    pub creator: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureProto {
    pub name: String,
    pub dtype: DType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProto {
    pub name: Option<String>,
    pub features: Vec<FeatureProto>,
    pub sampling: u32,
    pub creator: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorProto {
    pub key: String,
    pub attributes: Attributes,
    pub inputs: Vec<(String, u32)>,
    pub outputs: Vec<(String, u32)>,
}

/// A declared graph input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoProto {
    pub name: String,
    pub node: u32,
}
