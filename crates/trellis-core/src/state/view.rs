use serde_json::{Map, Value};

use super::path::join;
use super::{Scope, State};
use crate::error::Result;

/// A node-scoped view over a shared [`State`].
///
/// Every write is tagged with the view's node id, so `rollback` only ever
/// touches this node's pending patches. The `*_own` helpers address paths
/// relative to the node's namespace.
#[derive(Debug, Clone)]
pub struct NodeState {
    state: State,
    node_id: String,
}

impl NodeState {
    pub(crate) fn new(state: State, node_id: String) -> Self {
        Self { state, node_id }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn get(&self, scope: Scope, path: &str) -> Result<Option<Value>> {
        self.state.get(scope, path)
    }

    /// Read `path` under this node's namespace; an empty path reads the
    /// namespace root.
    pub fn get_own(&self, scope: Scope, path: &str) -> Result<Option<Value>> {
        self.state.get(scope, &join(&self.node_id, path))
    }

    pub fn get_ref(&self, path: &str) -> Result<Option<Value>> {
        self.state.get_ref(path)
    }

    pub fn resolve(&self, schema: &Value) -> Result<Value> {
        self.state.resolve(schema)
    }

    /// Queue a patch with absolute keys.
    pub fn update(&self, scope: Scope, patch: Value) -> Result<()> {
        self.state.update(scope, &self.node_id, patch)
    }

    pub fn update_at(&self, scope: Scope, path: &str, value: Value) -> Result<()> {
        self.state.update_at(scope, &self.node_id, path, value)
    }

    /// Queue a patch whose keys are relative to this node's namespace.
    pub fn update_own(&self, scope: Scope, patch: Map<String, Value>) -> Result<()> {
        let prefixed: Map<String, Value> = patch
            .into_iter()
            .map(|(key, value)| (join(&self.node_id, &key), value))
            .collect();
        self.state.update(scope, &self.node_id, Value::Object(prefixed))
    }

    pub fn update_own_at(&self, scope: Scope, path: &str, value: Value) -> Result<()> {
        self.state
            .update_at(scope, &self.node_id, &join(&self.node_id, path), value)
    }

    pub fn updates(&self, scope: Scope) -> Vec<Map<String, Value>> {
        self.state.get_updates(scope, &self.node_id)
    }

    pub fn commit(&self) -> Result<()> {
        self.state.commit()
    }

    pub fn rollback(&self) {
        self.state.rollback(&self.node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn own_paths_are_namespaced() {
        let state = State::new();
        let node = state.node("loop.body");
        let mut patch = Map::new();
        patch.insert("out".into(), json!(5));
        node.update_own(Scope::Io, patch).unwrap();
        node.commit().unwrap();

        assert_eq!(state.get(Scope::Io, "loop.body.out").unwrap(), Some(json!(5)));
        assert_eq!(node.get_own(Scope::Io, "out").unwrap(), Some(json!(5)));
        assert_eq!(node.get_own(Scope::Io, "").unwrap(), Some(json!({"out": 5})));
    }

    #[test]
    fn rollback_is_scoped_to_the_view() {
        let state = State::new();
        let a = state.node("a");
        let b = state.node("b");
        a.update_own_at(Scope::Comp, "x", json!(1)).unwrap();
        b.update_own_at(Scope::Comp, "x", json!(2)).unwrap();
        assert_eq!(a.updates(Scope::Comp).len(), 1);
        a.rollback();
        state.commit().unwrap();
        assert_eq!(state.get(Scope::Comp, "a").unwrap(), None);
        assert_eq!(state.get(Scope::Comp, "b.x").unwrap(), Some(json!(2)));
    }
}
