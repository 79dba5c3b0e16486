//! Store and viewmodel configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Emit binding warnings through `tracing`.
    pub debug: bool,
    /// Run value-equality shuffle detection when an array replaces an array.
    pub shuffle_on_set: bool,
    /// Upper bound on flush passes at batch unwind; guards against tasks
    /// that keep scheduling work.
    pub max_flush_passes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debug: true,
            shuffle_on_set: true,
            max_flush_passes: 100,
        }
    }
}

impl StoreConfig {
    pub fn from_json(input: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(input)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewmodelOptions {
    /// Initial data held by the root node.
    pub data: Value,
    /// The viewmodel belongs to a component instance.
    pub component: bool,
    /// Reference lookups do not ascend past the component boundary.
    pub isolated: bool,
}

impl Default for ViewmodelOptions {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            component: false,
            isolated: false,
        }
    }
}

impl ViewmodelOptions {
    pub fn with_data(data: Value) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn component(data: Value) -> Self {
        Self {
            data,
            component: true,
            isolated: false,
        }
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.isolated = isolated;
        self
    }
}
