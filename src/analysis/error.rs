use crate::store::{NodeId, OperatorId};
use thiserror::Error;

/// Failure to slice or linearize a graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Missing input: {} required by the requested outputs but not reachable from any declared input", .names.join(", "))]
    MissingInput { nodes: Vec<NodeId>, names: Vec<String> },

    #[error("Cyclic graph: no valid order exists for operators {}", .labels.join(", "))]
    CyclicGraph { operators: Vec<OperatorId>, labels: Vec<String> },

    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),
}
