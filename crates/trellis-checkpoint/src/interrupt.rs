use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Interrupt type for user-interaction requests.
pub const INTERACTION_TYPE: &str = "interaction";

/// Stream source used when an interrupt is emitted as an output chunk.
pub const INTERACTION_SOURCE: &str = "__interaction__";

/// Comp-state key under a node's namespace holding its interaction state.
pub const INTERACTION_KEY: &str = "__interaction__";

/// Path of a node's queued (not yet consumed) answers in comp-state.
pub fn queue_path(executable_id: &str) -> String {
    format!("{executable_id}.{INTERACTION_KEY}.queue")
}

/// Path of a node's consumed answers, in ask order, in comp-state.
pub fn history_path(executable_id: &str) -> String {
    format!("{executable_id}.{INTERACTION_KEY}.history")
}

/// A request for external input raised by a node.
///
/// Serializes as `{"type": "interaction", "index": k, "payload": [node_id, prompt]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    #[serde(rename = "type")]
    pub kind: String,
    /// Per-node ask counter within one invocation of the node.
    pub index: usize,
    /// `(node_id, prompt)`.
    pub payload: (String, Value),
}

impl Interrupt {
    pub fn interaction(node_id: impl Into<String>, index: usize, prompt: Value) -> Self {
        Self {
            kind: INTERACTION_TYPE.to_string(),
            index,
            payload: (node_id.into(), prompt),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.payload.0
    }

    pub fn prompt(&self) -> &Value {
        &self.payload.1
    }
}

/// Answers supplied on resume, keyed by the node id named in the interrupt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractiveInput {
    inputs: BTreeMap<String, Value>,
}

impl InteractiveInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, node_id: impl Into<String>, value: Value) -> Self {
        self.insert(node_id, value);
        self
    }

    pub fn insert(&mut self, node_id: impl Into<String>, value: Value) {
        self.inputs.insert(node_id.into(), value);
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.inputs.get(node_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inputs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Keys this crate reads from `RunConfig::configurable`.
pub mod config_keys {
    pub const SESSION_ID: &str = "session_id";
}
