//! Backend-side contract: concrete payloads and per-operator implementations.
use super::error::{EvaluationError, KernelError};
use crate::ops::registry::RegistryError;
use crate::store::{EventSetNode, GraphStore, Operator};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// Named concrete inputs of one operator call, keyed by input slot.
pub type Inputs<'a, D> = BTreeMap<&'a str, &'a D>;

/// Concrete outputs of one operator call, keyed by output slot.
pub type Outputs<D> = BTreeMap<String, D>;

/// Payload type a backend moves between operators.
pub trait EventData: Clone + Send + Sync + 'static {
    /// Checks that the payload matches the schema of `node`.
    fn check_schema(&self, _store: &GraphStore, _node: &EventSetNode) -> Result<(), String> {
        Ok(())
    }

    /// Whether both payloads carry the same sampling.
    fn shares_sampling(&self, _other: &Self) -> bool {
        true
    }
}

/// One operator's computation on a given backend. Must not keep hidden state
/// between calls.
pub trait Implementation<D>: Send + Sync {
    fn call(&self, operator: &Operator, inputs: &Inputs<'_, D>) -> Result<Outputs<D>, KernelError>;
}

pub type ImplementationFactory<D> =
    Box<dyn Fn(&Operator) -> Result<Box<dyn Implementation<D>>, KernelError> + Send + Sync>;

/// Frozen table mapping operator keys to implementation constructors for one backend.
pub struct ImplementationRegistry<D> {
    backend: String,
    factories: BTreeMap<String, ImplementationFactory<D>>,
}

impl<D: EventData> ImplementationRegistry<D> {
    pub fn builder(backend: impl Into<String>) -> ImplementationRegistryBuilder<D> {
        ImplementationRegistryBuilder { backend: backend.into(), factories: BTreeMap::new() }
    }

    pub fn backend(&self) -> &str { &self.backend }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Builds the implementation for one operator instance.
    pub fn get_implementation(&self, operator: &Operator) -> Result<Box<dyn Implementation<D>>, EvaluationError> {
        let factory = self.factories.get(operator.key()).ok_or_else(|| EvaluationError::UnimplementedOperator {
            key: operator.key().to_string(),
            backend: self.backend.clone(),
        })?;
        Ok(factory(operator)?)
    }
}

impl<D> fmt::Debug for ImplementationRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationRegistry")
            .field("backend", &self.backend)
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct ImplementationRegistryBuilder<D> {
    backend: String,
    factories: BTreeMap<String, ImplementationFactory<D>>,
}

impl<D: EventData> ImplementationRegistryBuilder<D> {
    pub fn register_operator_implementation<F>(&mut self, key: &str, factory: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&Operator) -> Result<Box<dyn Implementation<D>>, KernelError> + Send + Sync + 'static,
    {
        if self.factories.contains_key(key) {
            return Err(RegistryError::DuplicateRegistration { key: key.to_string(), backend: Some(self.backend.clone()) });
        }
        self.factories.insert(key.to_string(), Box::new(factory));
        Ok(self)
    }

    pub fn build(self) -> ImplementationRegistry<D> {
        info!(backend = %self.backend, operators = self.factories.len(), "implementation registry frozen");
        ImplementationRegistry { backend: self.backend, factories: self.factories }
    }
}
