//! Evaluation of schedules against a concrete backend.
pub mod error;
pub mod evaluator;
pub mod implementation;
pub mod ledger;
pub mod options;

pub use error::{EvaluationError, KernelError};
pub use evaluator::Evaluator;
pub use implementation::{
    EventData, Implementation, ImplementationFactory, ImplementationRegistry, ImplementationRegistryBuilder, Inputs,
    Outputs,
};
pub use options::EvaluationOptions;
