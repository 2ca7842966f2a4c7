//! Errors raised while building a graph.
use super::types::NodeId;
use thiserror::Error;

/// Construction-time failure of an operator or input declaration.
///
/// These are never downgraded to warnings: the offending call fails and the
/// store is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Sampling mismatch in operator '{operator}': {left} and {right} do not share the same sampling")]
    SamplingMismatch { operator: String, left: String, right: String },

    #[error("Type mismatch in operator '{operator}': {message}")]
    TypeMismatch { operator: String, message: String },

    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("Invalid arguments for operator '{operator}': {message}")]
    InvalidArguments { operator: String, message: String },

    #[error("Invalid attribute '{attribute}' for operator '{operator}': {message}")]
    InvalidAttribute { operator: String, attribute: String, message: String },

    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("Output '{slot}' of operator '{operator}' does not match its declaration: {message}")]
    OutputMismatch { operator: String, slot: String, message: String },
}
