use super::definition::{OperatorDef, OperatorKind};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Operator '{key}' is already registered{}", .backend.as_ref().map(|b| format!(" for backend '{}'", b)).unwrap_or_default())]
    DuplicateRegistration { key: String, backend: Option<String> },
}

struct Entry {
    definition: OperatorDef,
    kind: Box<dyn OperatorKind>,
}

/// Frozen table of operator keys. Built once by an `OperatorRegistryBuilder`
/// and shared read-only afterwards.
pub struct OperatorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl OperatorRegistry {
    pub fn builder() -> OperatorRegistryBuilder {
        OperatorRegistryBuilder { entries: BTreeMap::new() }
    }

    pub fn get(&self, key: &str) -> Option<&dyn OperatorKind> {
        self.entries.get(key).map(|e| e.kind.as_ref())
    }

    pub fn definition(&self, key: &str) -> Option<&OperatorDef> {
        self.entries.get(key).map(|e| &e.definition)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Every registered key with its definition, in key order.
    pub fn registered_operators(&self) -> BTreeMap<&str, &OperatorDef> {
        self.entries.iter().map(|(k, e)| (k.as_str(), &e.definition)).collect()
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry").field("keys", &self.entries.keys().collect::<Vec<_>>()).finish()
    }
}

pub struct OperatorRegistryBuilder {
    entries: BTreeMap<String, Entry>,
}

impl OperatorRegistryBuilder {
    pub fn register_operator(&mut self, kind: impl OperatorKind + 'static) -> Result<&mut Self, RegistryError> {
        let definition = kind.definition();
        let key = definition.key.to_string();
        if self.entries.contains_key(&key) {
            return Err(RegistryError::DuplicateRegistration { key, backend: None });
        }
        self.entries.insert(key, Entry { definition, kind: Box::new(kind) });
        Ok(self)
    }

    pub fn build(self) -> OperatorRegistry {
        info!(operators = self.entries.len(), "operator registry frozen");
        OperatorRegistry { entries: self.entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::definition::{InferContext, OutputSchema};
    use crate::store::GraphError;

    struct Noop(&'static str);

    impl OperatorKind for Noop {
        fn definition(&self) -> OperatorDef {
            OperatorDef::new(self.0).input("input").output("output")
        }

        fn output_schema(&self, _ctx: &InferContext<'_>) -> Result<Vec<OutputSchema>, GraphError> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = OperatorRegistry::builder();
        builder.register_operator(Noop("NOOP")).unwrap();
        let err = builder.register_operator(Noop("NOOP")).err().unwrap();
        assert_eq!(err, RegistryError::DuplicateRegistration { key: "NOOP".into(), backend: None });
        assert_eq!(err.to_string(), "Operator 'NOOP' is already registered");
    }

    #[test]
    fn test_registered_operators_are_sorted() {
        let mut builder = OperatorRegistry::builder();
        builder.register_operator(Noop("B")).unwrap().register_operator(Noop("A")).unwrap();
        let reg = builder.build();
        let keys: Vec<_> = reg.registered_operators().keys().copied().collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert!(reg.get("A").is_some());
        assert!(reg.get("C").is_none());
    }

    #[test]
    fn test_isolated_registries_coexist() {
        let mut one = OperatorRegistry::builder();
        one.register_operator(Noop("ONLY_HERE")).unwrap();
        let one = one.build();
        let two = OperatorRegistry::builder().build();
        assert!(one.contains("ONLY_HERE"));
        assert!(!two.contains("ONLY_HERE"));
    }
}
