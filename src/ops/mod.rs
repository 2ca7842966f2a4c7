//! Operator definitions, the operator registry and the standard catalogue.
pub mod arithmetic;
pub mod calendar;
pub mod definition;
pub mod filter;
pub mod index;
pub mod join;
pub mod registry;
pub mod scalar;
pub mod structure;
pub mod temporal;
pub mod unary;
pub mod window;

pub use arithmetic::{
    add, binary, divide, equal, floordiv, greater, greater_equal, less, less_equal, modulo, multiply, not_equal, power,
    subtract, BinaryOp,
};
pub use calendar::{calendar, CalendarUnit};
pub use definition::{InferContext, OperatorDef, OperatorKind, OutputFeature, OutputSampling, OutputSchema};
pub use filter::filter;
pub use index::{add_index, drop_index};
pub use join::join;
pub use registry::{OperatorRegistry, OperatorRegistryBuilder, RegistryError};
pub use scalar::{scalar, ScalarOp};
pub use structure::{cast, glue, prefix, select};
pub use temporal::{lag, timestamps, unique_timestamps};
pub use unary::{abs, invert, UnaryOp};
pub use window::{moving, moving_sum, simple_moving_average, WindowOp};

use std::sync::Arc;

/// Registers every built-in operator and freezes the result.
pub fn standard_registry() -> Result<Arc<OperatorRegistry>, RegistryError> {
    let mut builder = OperatorRegistry::builder();
    register_standard(&mut builder)?;
    Ok(Arc::new(builder.build()))
}

/// Registers the built-in operators into an existing builder, so callers can
/// add their own operators next to them.
pub fn register_standard(builder: &mut OperatorRegistryBuilder) -> Result<(), RegistryError> {
    arithmetic::register(builder)?;
    scalar::register(builder)?;
    unary::register(builder)?;
    calendar::register(builder)?;
    window::register(builder)?;
    filter::register(builder)?;
    temporal::register(builder)?;
    structure::register(builder)?;
    index::register(builder)?;
    join::register(builder)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_lists_catalogue() {
        let reg = standard_registry().unwrap();
        let ops = reg.registered_operators();
        assert_eq!(ops.len(), 13 + 7 + 2 + 9 + 6 + 1 + 3 + 4 + 2 + 1);
        for key in ["ADDITION", "CALENDAR_HOUR", "SIMPLE_MOVING_AVERAGE", "FILTER", "JOIN", "DROP_INDEX", "GLUE"] {
            assert!(ops.contains_key(key), "{key} missing");
        }
        assert_eq!(ops["ADDITION"].inputs.len(), 2);
        assert_eq!(ops["ADDITION"].outputs, vec!["output"]);
    }

    #[test]
    fn test_registering_standard_twice_fails() {
        let mut builder = OperatorRegistry::builder();
        register_standard(&mut builder).unwrap();
        let err = register_standard(&mut builder).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistration { ref key, .. } if key == "ADDITION"));
    }
}
