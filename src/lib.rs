//! Declarative computation graphs over indexed event streams.
//!
//! Graphs are built against a frozen [`ops::OperatorRegistry`], which checks
//! schemas and samplings as each operator is added. A [`graph::Processor`]
//! slices the graph between declared inputs and outputs,
//! [`analysis::build_schedule`] orders it, and a [`compute::Evaluator`] runs
//! the schedule against any backend that registers implementations.
//! [`serialize`] turns a processor into a versioned blob and back.

pub mod analysis;
pub mod backend;
pub mod compute;
pub mod display;
pub mod graph;
pub mod ops;
pub mod serialize;
pub mod store;

pub use analysis::{build_schedule, schedule_processor, Schedule, ScheduleError};
pub use compute::{EvaluationError, EvaluationOptions, Evaluator, ImplementationRegistry};
pub use graph::Processor;
pub use ops::{standard_registry, OperatorRegistry, RegistryError};
pub use serialize::{deserialize, serialize, DeserializationError, SerializationError};
pub use store::{DType, GraphError, GraphStore, InputSpec, NodeId, OperatorId, SamplingId};
