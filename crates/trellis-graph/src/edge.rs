use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::error::Result;

use crate::context::Context;

/// A static edge connecting two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

type RouteFn = dyn Fn(&Context) -> Result<String> + Send + Sync;

/// A conditional edge that routes to different targets based on state.
///
/// The router runs after the source node has committed and returns a key.
/// If a `path_map` is provided, the key is looked up in the map to
/// determine the actual target node. Otherwise the key itself is used
/// as the target node name.
#[derive(Clone)]
pub struct ConditionalEdge {
    pub from: String,
    route_fn: Arc<RouteFn>,
    path_map: Option<HashMap<String, String>>,
}

impl std::fmt::Debug for ConditionalEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionalEdge")
            .field("from", &self.from)
            .field("path_map", &self.path_map)
            .finish_non_exhaustive()
    }
}

impl ConditionalEdge {
    pub fn new<F>(
        from: impl Into<String>,
        route_fn: F,
        path_map: Option<HashMap<String, String>>,
    ) -> Self
    where
        F: Fn(&Context) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            from: from.into(),
            route_fn: Arc::new(route_fn),
            path_map,
        }
    }

    pub fn path_map(&self) -> Option<&HashMap<String, String>> {
        self.path_map.as_ref()
    }

    /// Resolve the target node name for the current state.
    pub fn resolve(&self, ctx: &Context) -> Result<String> {
        let key = (self.route_fn)(ctx)?;
        Ok(match &self.path_map {
            Some(map) => map.get(&key).cloned().unwrap_or(key),
            None => key,
        })
    }
}
