//! Graph slicing between declared inputs and outputs.
pub mod processor;

pub use processor::Processor;
