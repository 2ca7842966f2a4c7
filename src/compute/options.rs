use serde::{Deserialize, Serialize};

/// Knobs of a single evaluation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationOptions {
    /// Compare every backend output with the node it realizes.
    pub check_execution: bool,
    /// Drop intermediate results once their last reader has run.
    pub evict_intermediates: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self { check_execution: true, evict_intermediates: true }
    }
}

impl EvaluationOptions {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
