//! Workload handed to a submission client.

use serde::{Deserialize, Serialize};

/// One step of a workload. Its semantics belong to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name
    pub name: String,

    /// Free-form properties forwarded to the coordinator
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl Stage {
    /// Create a stage with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: serde_json::Value::Null,
        }
    }

    /// Attach properties.
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// A compiled job ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Job name
    pub name: String,

    /// Parallelism requested for the job (None = coordinator default)
    pub parallelism: Option<u32>,

    /// Ordered stages
    pub stages: Vec<Stage>,
}

impl Workload {
    /// Create a workload.
    pub fn new(name: impl Into<String>, parallelism: Option<u32>, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            parallelism,
            stages,
        }
    }
}
