pub mod arena;
pub mod error;
pub mod types;

pub use arena::{Consumers, GraphStore};
pub use error::GraphError;
pub use types::*;
