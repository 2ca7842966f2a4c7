use crate::analysis::ScheduleError;
use crate::store::NodeId;
use thiserror::Error;

/// Failure reported by a backend implementation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Kernel failure in operator '{operator}': {message}")]
pub struct KernelError {
    pub operator: String,
    pub message: String,
}

impl KernelError {
    pub fn new(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self { operator: operator.into(), message: message.into() }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Operator '{key}' has no implementation in backend '{backend}'")]
    UnimplementedOperator { key: String, backend: String },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("No data supplied for input {name}")]
    MissingInputData { node: NodeId, name: String },

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Execution check failed for operator '{operator}': {message}")]
    ExecutionCheck { operator: String, message: String },
}
