//! Shared data types for experiment runs

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-supplied parameters, written verbatim as JSON and forwarded key-for-key
pub type ParameterSet = serde_json::Map<String, serde_json::Value>;

/// Named metric values for one logging step
pub type MetricSet = BTreeMap<String, f64>;

/// Opaque identifier for one experiment run
///
/// Used as the snapshot directory name, the tracking run name and the
/// default auto-commit message. Never changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Generate a random (UUID v4) id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a caller-supplied id
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::generate()
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ExperimentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExperimentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Render a JSON parameter value the way tracking backends store it (as text)
pub fn param_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
