use crate::store::{GraphError, NodeId, OperatorId, SamplingId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Node {0:?} of the processor is not in the store")]
    UnknownNode(NodeId),

    #[error("Operator {0:?} of the processor is not in the store")]
    UnknownOperator(OperatorId),

    #[error("Sampling {0:?} of the processor is not in the store")]
    UnknownSampling(SamplingId),

    #[error("Failed to encode graph: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to render graph as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Rejection of a blob. A blob never loads partially.
#[derive(Error, Debug)]
pub enum DeserializationError {
    #[error("Not a graph blob: bad magic bytes")]
    BadMagic,

    #[error("Unsupported graph format version {found} (this build reads version {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("Malformed graph body: {0}")]
    Malformed(String),

    #[error("Unknown operator '{key}' in operator #{operator}")]
    UnknownOperator { key: String, operator: u32 },

    #[error("Malformed attribute '{attribute}' for operator '{operator}': {message}")]
    MalformedAttribute { operator: String, attribute: String, message: String },

    #[error("Dangling {kind} reference #{id} in {context}")]
    DanglingReference { kind: &'static str, id: u32, context: String },

    #[error(transparent)]
    Validation(#[from] GraphError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
