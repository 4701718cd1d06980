use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::path::{deep_merge, lookup, parse_path, slot_mut, type_name};
use crate::error::{Result, StateError};

/// A queued, not yet visible, patch: path-keyed entries tagged by the node
/// that wrote them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPatch {
    pub node_id: String,
    pub patch: Map<String, Value>,
}

/// Apply one patch to `tree`. Each entry is merged at its path.
pub fn merge(tree: &mut Value, patch: &Map<String, Value>) -> Result<()> {
    for (path, value) in patch {
        let tokens = parse_path(path)?;
        deep_merge(slot_mut(tree, &tokens), value.clone());
    }
    Ok(())
}

/// One sub-store: a committed tree plus an ordered log of pending patches.
/// `commit` folds the log over the tree in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitJournal {
    committed: Value,
    pending: Vec<PendingPatch>,
}

impl Default for CommitJournal {
    fn default() -> Self {
        Self {
            committed: Value::Object(Map::new()),
            pending: Vec::new(),
        }
    }
}

impl CommitJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a committed value. Pending patches are never visible here.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let tokens = parse_path(path)?;
        Ok(lookup(&self.committed, &tokens).cloned())
    }

    pub fn committed(&self) -> &Value {
        &self.committed
    }

    /// Queue a patch. Paths are validated now so that `commit` cannot fail
    /// halfway through the log.
    pub fn update(&mut self, node_id: &str, patch: Value) -> Result<()> {
        let patch = match patch {
            Value::Object(map) => map,
            other => {
                return Err(StateError::InvalidPatch {
                    node: node_id.to_string(),
                    found: type_name(&other).to_string(),
                }
                .into());
            }
        };
        for path in patch.keys() {
            parse_path(path)?;
        }
        if !patch.is_empty() {
            self.pending.push(PendingPatch {
                node_id: node_id.to_string(),
                patch,
            });
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        for entry in std::mem::take(&mut self.pending) {
            merge(&mut self.committed, &entry.patch)?;
        }
        Ok(())
    }

    pub fn rollback(&mut self, node_id: &str) {
        self.pending.retain(|entry| entry.node_id != node_id);
    }

    /// Pending patches queued by `node_id`, oldest first.
    pub fn updates(&self, node_id: &str) -> Vec<Map<String, Value>> {
        self.pending
            .iter()
            .filter(|entry| entry.node_id == node_id)
            .map(|entry| entry.patch.clone())
            .collect()
    }

    pub fn pending(&self) -> &[PendingPatch] {
        &self.pending
    }

    /// Replace the committed tree and drop any pending patches.
    pub fn restore(&mut self, committed: Value) {
        self.committed = match committed {
            Value::Object(_) => committed,
            _ => Value::Object(Map::new()),
        };
        self.pending.clear();
    }

    /// Append previously captured pending patches to the log.
    pub fn replay(&mut self, pending: Vec<PendingPatch>) {
        self.pending.extend(pending);
    }
}
