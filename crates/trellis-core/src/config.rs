use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration passed into a workflow invocation and down through every
/// graph level it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Labels attached to the run's log lines.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Maximum number of super-steps per graph level. Loop bodies and
    /// subgraphs each get their own budget.
    pub recursion_limit: usize,

    /// Fallback session id when none is configured.
    pub run_id: Uuid,

    /// Open-ended settings; the checkpoint crate keeps the session id here.
    #[serde(default)]
    pub configurable: HashMap<String, serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            metadata: HashMap::new(),
            recursion_limit: 25,
            run_id: Uuid::new_v4(),
            configurable: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_configurable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configurable.insert(key.into(), value);
        self
    }
}
