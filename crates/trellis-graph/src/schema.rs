//! Per-node configuration: schemas, transformers, abilities and flags.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use trellis_core::error::{GraphError, Result};
use trellis_core::state::path::lookup;
use trellis_core::state::{State, as_reference, parse_path};

use crate::component::{Ability, AbilitySet};

/// Builds a node's inputs from the state and its input schema.
pub type InputTransformer = Arc<dyn Fn(&State, &Value) -> Result<Value> + Send + Sync>;

/// Shapes a node's raw output, given its output schema.
pub type OutputTransformer = Arc<dyn Fn(&Value, Value) -> Result<Value> + Send + Sync>;

/// How one node is wired into execution.
#[derive(Clone, Default)]
pub struct NodeSpec {
    pub input_schema: Value,
    pub output_schema: Value,
    pub input_transformer: Option<InputTransformer>,
    pub output_transformer: Option<OutputTransformer>,
    pub abilities: AbilitySet,
    /// Suppress trace hooks for this node.
    pub skip_trace: bool,
    /// Leave this node's writes pending after it runs.
    pub skip_commit: bool,
    /// Fan-in: run only once every static predecessor has completed.
    pub wait_for_all: bool,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .field("abilities", &self.abilities)
            .field("skip_trace", &self.skip_trace)
            .field("skip_commit", &self.skip_commit)
            .field("wait_for_all", &self.wait_for_all)
            .finish_non_exhaustive()
    }
}

impl NodeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_outputs(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_input_transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(&State, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.input_transformer = Some(Arc::new(f));
        self
    }

    pub fn with_output_transformer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.output_transformer = Some(Arc::new(f));
        self
    }

    pub fn with_abilities(mut self, abilities: &[Ability]) -> Self {
        self.abilities = AbilitySet::of(abilities);
        self
    }

    pub fn skip_trace(mut self) -> Self {
        self.skip_trace = true;
        self
    }

    pub fn skip_commit(mut self) -> Self {
        self.skip_commit = true;
        self
    }

    pub fn wait_for_all(mut self) -> Self {
        self.wait_for_all = true;
        self
    }

    /// Reject schemas carrying `${…}` references that do not parse.
    pub fn validate(&self, node: &str) -> Result<()> {
        if self.abilities.is_empty() {
            return Err(GraphError::InvalidSchema {
                node: node.to_string(),
                detail: "no abilities declared".into(),
            }
            .into());
        }
        check_references(node, &self.input_schema)?;
        check_references(node, &self.output_schema)
    }

    /// Inputs for one call: the transformer if present, otherwise the input
    /// schema resolved against state. An absent schema yields `{}`.
    pub fn resolve_inputs(&self, state: &State) -> Result<Value> {
        if let Some(transform) = &self.input_transformer {
            return transform(state, &self.input_schema);
        }
        match &self.input_schema {
            Value::Null => Ok(Value::Object(Map::new())),
            schema => state.resolve(schema),
        }
    }

    /// Shape a raw output for persistence.
    ///
    /// Without a schema the raw output is kept. Otherwise each schema key is
    /// taken from the raw output; a `${path}` value selects that path of the
    /// raw output instead. Keys the raw output cannot provide are skipped.
    pub fn filter_outputs(&self, raw: Value) -> Result<Value> {
        if let Some(transform) = &self.output_transformer {
            return transform(&self.output_schema, raw);
        }
        let schema = match &self.output_schema {
            Value::Object(map) if !map.is_empty() => map,
            _ => return Ok(raw),
        };

        let mut out = Map::new();
        for (key, selector) in schema {
            let picked = match selector.as_str().and_then(as_reference) {
                Some(path) => lookup(&raw, &parse_path(path)?).cloned(),
                None => raw.get(key).cloned(),
            };
            if let Some(value) = picked {
                out.insert(key.clone(), value);
            }
        }
        Ok(Value::Object(out))
    }
}

fn check_references(node: &str, schema: &Value) -> Result<()> {
    match schema {
        Value::String(s) => match as_reference(s) {
            Some(path) => parse_path(path).map(|_| ()).map_err(|e| {
                GraphError::InvalidSchema {
                    node: node.to_string(),
                    detail: e.to_string(),
                }
                .into()
            }),
            None if s.trim_start().starts_with("${") => Err(GraphError::InvalidSchema {
                node: node.to_string(),
                detail: format!("malformed reference '{s}'"),
            }
            .into()),
            None => Ok(()),
        },
        Value::Object(map) => map.values().try_for_each(|v| check_references(node, v)),
        Value::Array(items) => items.iter().try_for_each(|v| check_references(node, v)),
        _ => Ok(()),
    }
}

/// Execution configuration shared by every node of one graph level.
#[derive(Debug, Clone, Default)]
pub struct GraphConfig {
    nodes: HashMap<String, NodeSpec>,
    env: HashMap<String, Value>,
    stream_edges: Vec<(String, String)>,
}

impl GraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&mut self, node_id: impl Into<String>, spec: NodeSpec) {
        self.nodes.insert(node_id.into(), spec);
    }

    /// The spec registered for `node_id`, or the default `{invoke}` spec.
    pub fn node(&self, node_id: &str) -> NodeSpec {
        self.nodes.get(node_id).cloned().unwrap_or_default()
    }

    pub fn node_ref(&self, node_id: &str) -> Option<&NodeSpec> {
        self.nodes.get(node_id)
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: Value) {
        self.env.insert(key.into(), value);
    }

    pub fn env(&self, key: &str) -> Option<&Value> {
        self.env.get(key)
    }

    pub fn add_stream_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let edge = (from.into(), to.into());
        if !self.stream_edges.contains(&edge) {
            self.stream_edges.push(edge);
        }
    }

    pub fn stream_edges(&self) -> &[(String, String)] {
        &self.stream_edges
    }

    /// Nodes that receive `from`'s chunks.
    pub fn stream_targets(&self, from: &str) -> Vec<&str> {
        self.stream_edges
            .iter()
            .filter(|(f, _)| f == from)
            .map(|(_, t)| t.as_str())
            .collect()
    }
}
