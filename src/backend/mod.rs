//! Concrete backends: each pairs a payload type with an implementation registry.
pub mod array;
pub mod pipeline;
