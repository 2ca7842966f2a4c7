//! Human-readable dumps used when debugging graphs.
pub mod trace;

pub use trace::{format_lineage, format_processor, format_schedule};
