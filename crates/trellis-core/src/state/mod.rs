//! Layered execution state.
//!
//! Three independent sub-stores (`global`, `io`, `comp`), each a nested JSON
//! tree behind a commit journal. Writes are queued per node and become
//! visible only on `commit`; `rollback` discards a node's queued writes.

pub mod journal;
pub mod path;
pub mod view;

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
pub use journal::{CommitJournal, PendingPatch};
pub use path::{PathToken, as_reference, parse_path};
pub use view::NodeState;

/// Which sub-store an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Long-lived workflow variables.
    Global,
    /// Node inputs and outputs, keyed by executable id.
    Io,
    /// Private component bookkeeping.
    Comp,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Global, Scope::Io, Scope::Comp];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Io => write!(f, "io"),
            Self::Comp => write!(f, "comp"),
        }
    }
}

/// The committed trees of all three sub-stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub global: Value,
    pub io: Value,
    pub comp: Value,
}

/// The pending journals of all three sub-stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdates {
    #[serde(default)]
    pub global: Vec<PendingPatch>,
    #[serde(default)]
    pub io: Vec<PendingPatch>,
    #[serde(default)]
    pub comp: Vec<PendingPatch>,
}

impl PendingUpdates {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.io.is_empty() && self.comp.is_empty()
    }
}

#[derive(Debug, Default)]
struct Layers {
    global: CommitJournal,
    io: CommitJournal,
    comp: CommitJournal,
}

impl Layers {
    fn journal(&self, scope: Scope) -> &CommitJournal {
        match scope {
            Scope::Global => &self.global,
            Scope::Io => &self.io,
            Scope::Comp => &self.comp,
        }
    }

    fn journal_mut(&mut self, scope: Scope) -> &mut CommitJournal {
        match scope {
            Scope::Global => &mut self.global,
            Scope::Io => &mut self.io,
            Scope::Comp => &mut self.comp,
        }
    }

    fn lookup_ref(&self, path: &str) -> Result<Option<Value>> {
        let tokens = parse_path(path)?;
        Ok(path::lookup(self.io.committed(), &tokens)
            .or_else(|| path::lookup(self.global.committed(), &tokens))
            .cloned())
    }

    fn resolve(&self, schema: &Value) -> Result<Value> {
        match schema {
            Value::String(s) => match as_reference(s) {
                Some(path) => Ok(self.lookup_ref(path)?.unwrap_or(Value::Null)),
                None => Ok(schema.clone()),
            },
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve(value)?);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

/// Shared handle to one execution's state. Clones see the same trees.
#[derive(Debug, Clone, Default)]
pub struct State {
    inner: Arc<RwLock<Layers>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Layers> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Layers> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed value at `path` in `scope`.
    pub fn get(&self, scope: Scope, path: &str) -> Result<Option<Value>> {
        self.read().journal(scope).get(path)
    }

    /// Resolve a reference path against io first, then global.
    pub fn get_ref(&self, path: &str) -> Result<Option<Value>> {
        self.read().lookup_ref(path)
    }

    /// Resolve a schema: whole-string `${path}` references are looked up,
    /// maps and lists recurse, everything else passes through. Unresolved
    /// references become `null`.
    pub fn resolve(&self, schema: &Value) -> Result<Value> {
        self.read().resolve(schema)
    }

    /// Queue a path-keyed patch under `node_id`.
    pub fn update(&self, scope: Scope, node_id: &str, patch: Value) -> Result<()> {
        self.write().journal_mut(scope).update(node_id, patch)
    }

    /// Queue a single-entry patch.
    pub fn update_at(&self, scope: Scope, node_id: &str, path: &str, value: Value) -> Result<()> {
        let mut patch = Map::new();
        patch.insert(path.to_string(), value);
        self.update(scope, node_id, Value::Object(patch))
    }

    /// Flush every sub-store's pending journal.
    pub fn commit(&self) -> Result<()> {
        let mut layers = self.write();
        for scope in Scope::ALL {
            layers.journal_mut(scope).commit()?;
        }
        Ok(())
    }

    pub fn commit_scope(&self, scope: Scope) -> Result<()> {
        self.write().journal_mut(scope).commit()
    }

    /// Drop `node_id`'s pending patches in every sub-store.
    pub fn rollback(&self, node_id: &str) {
        let mut layers = self.write();
        for scope in Scope::ALL {
            layers.journal_mut(scope).rollback(node_id);
        }
    }

    pub fn rollback_scope(&self, scope: Scope, node_id: &str) {
        self.write().journal_mut(scope).rollback(node_id);
    }

    pub fn get_updates(&self, scope: Scope, node_id: &str) -> Vec<Map<String, Value>> {
        self.read().journal(scope).updates(node_id)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let layers = self.read();
        StateSnapshot {
            global: layers.global.committed().clone(),
            io: layers.io.committed().clone(),
            comp: layers.comp.committed().clone(),
        }
    }

    pub fn pending(&self) -> PendingUpdates {
        let layers = self.read();
        PendingUpdates {
            global: layers.global.pending().to_vec(),
            io: layers.io.pending().to_vec(),
            comp: layers.comp.pending().to_vec(),
        }
    }

    /// Replace all committed trees; pending journals are cleared.
    pub fn restore(&self, snapshot: StateSnapshot) {
        let mut layers = self.write();
        layers.global.restore(snapshot.global);
        layers.io.restore(snapshot.io);
        layers.comp.restore(snapshot.comp);
    }

    /// Append captured journals to the pending logs.
    pub fn replay(&self, pending: PendingUpdates) {
        let mut layers = self.write();
        layers.global.replay(pending.global);
        layers.io.replay(pending.io);
        layers.comp.replay(pending.comp);
    }

    /// A view whose writes are tagged with `node_id`.
    pub fn node(&self, node_id: impl Into<String>) -> NodeState {
        NodeState::new(self.clone(), node_id.into())
    }
}
