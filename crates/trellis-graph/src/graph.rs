use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use trellis_core::error::{GraphError, Result};

use crate::component::Component;
use crate::constants::{END, START};
use crate::edge::{ConditionalEdge, Edge};
use crate::executable::ExecutableGraph;
use crate::schema::{GraphConfig, NodeSpec};
use crate::vertex::Vertex;

/// Builder for a workflow graph.
///
/// Use `add_node`, `add_edge`, `add_conditional_edges`, etc. to define
/// the graph topology, then call `compile()` to validate and produce
/// an [`ExecutableGraph`].
#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: HashMap<String, Vertex>,
    config: GraphConfig,
    edges: Vec<Edge>,
    conditional_edges: Vec<ConditionalEdge>,
    entry_point: Option<String>,
    finish_points: Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    ///
    /// Returns an error if a node with the same name already exists, if the
    /// name is a reserved sentinel (`__start__` / `__end__`) or cannot be
    /// used as a path segment, or if its spec carries malformed references.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        component: Arc<dyn Component>,
        spec: NodeSpec,
    ) -> Result<&mut Self> {
        let name = name.into();
        if name == START || name == END {
            return Err(GraphError::InvalidGraph(format!(
                "Cannot add node with reserved name '{name}'"
            ))
            .into());
        }
        if name.is_empty() || name.contains(['.', '[', ']']) {
            return Err(GraphError::InvalidGraph(format!(
                "Node name '{name}' must be non-empty and free of '.', '[' and ']'"
            ))
            .into());
        }
        if self.vertices.contains_key(&name) {
            return Err(
                GraphError::InvalidGraph(format!("Duplicate node name: '{name}'")).into(),
            );
        }
        spec.validate(&name)?;

        self.config.insert_node(name.clone(), spec);
        self.vertices
            .insert(name.clone(), Vertex::new(name).bind(component));
        Ok(self)
    }

    /// Add a static edge between two nodes.
    ///
    /// Both `from` and `to` can be node names or sentinels (`START` / `END`).
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    pub fn add_conditional_edges(&mut self, edge: ConditionalEdge) -> &mut Self {
        self.conditional_edges.push(edge);
        self
    }

    /// Route `from`'s output chunks into `to`'s input queue.
    pub fn add_stream_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.config.add_stream_edge(from, to);
        self
    }

    pub fn set_env(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.config.set_env(key, value);
        self
    }

    /// Set the entry point (first node to execute after `START`).
    pub fn set_entry_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.entry_point = Some(node.into());
        self
    }

    /// Add a finish point (node that leads to `END`).
    pub fn set_finish_point(&mut self, node: impl Into<String>) -> &mut Self {
        self.finish_points.push(node.into());
        self
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.vertices.contains_key(name)
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Validate the graph and produce an [`ExecutableGraph`].
    pub fn compile(self) -> Result<ExecutableGraph> {
        let entry_point = self.validate()?.to_string();

        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &self.edges {
            let targets = adjacency.entry(edge.from.clone()).or_default();
            if !targets.contains(&edge.to) {
                targets.push(edge.to.clone());
            }
        }
        adjacency
            .entry(START.to_string())
            .or_default()
            .push(entry_point.clone());
        for fp in &self.finish_points {
            adjacency.entry(fp.clone()).or_default().push(END.to_string());
        }

        // Fan-in barriers wait on static, non-sentinel predecessors only.
        let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &self.edges {
            let waits = self
                .config
                .node_ref(&edge.to)
                .is_some_and(|spec| spec.wait_for_all);
            if waits && edge.from != START {
                let preds = predecessors.entry(edge.to.clone()).or_default();
                if !preds.contains(&edge.from) {
                    preds.push(edge.from.clone());
                }
            }
        }

        Ok(ExecutableGraph::new(
            self.vertices,
            adjacency,
            self.conditional_edges,
            predecessors,
            Arc::new(self.config),
            entry_point,
        ))
    }

    /// Validate the graph structure, returning the entry point.
    fn validate(&self) -> Result<&str> {
        // 1. Entry point must be set
        let entry = self
            .entry_point
            .as_deref()
            .ok_or_else(|| GraphError::InvalidGraph("Entry point not set".to_string()))?;

        // 2. Entry point node must exist
        if !self.vertices.contains_key(entry) {
            return Err(GraphError::InvalidGraph(format!(
                "Entry point node '{entry}' does not exist"
            ))
            .into());
        }

        // 3. All edges must reference existing nodes (or sentinels)
        for edge in &self.edges {
            self.validate_node_ref(&edge.from, "edge source")?;
            self.validate_node_ref(&edge.to, "edge target")?;
        }

        // 4. All conditional edges must reference existing nodes
        for ce in &self.conditional_edges {
            self.validate_node_ref(&ce.from, "conditional edge source")?;
            if let Some(pm) = ce.path_map() {
                for target in pm.values() {
                    self.validate_node_ref(target, "conditional edge target")?;
                }
            }
        }

        // 5. All finish points must reference existing nodes
        for fp in &self.finish_points {
            if !self.vertices.contains_key(fp) {
                return Err(GraphError::InvalidGraph(format!(
                    "Finish point node '{fp}' does not exist"
                ))
                .into());
            }
        }

        // 6. Stream edges join a chunk producer to a chunk consumer
        for (from, to) in self.config.stream_edges() {
            let source = self.config.node_ref(from).ok_or_else(|| {
                GraphError::InvalidGraph(format!("Unknown node '{from}' referenced as stream edge source"))
            })?;
            let target = self.config.node_ref(to).ok_or_else(|| {
                GraphError::InvalidGraph(format!("Unknown node '{to}' referenced as stream edge target"))
            })?;
            if !source.abilities.writes_stream() {
                return Err(GraphError::InvalidGraph(format!(
                    "Stream edge source '{from}' neither streams nor transforms"
                ))
                .into());
            }
            if !target.abilities.reads_stream() {
                return Err(GraphError::InvalidGraph(format!(
                    "Stream edge target '{to}' neither collects nor transforms"
                ))
                .into());
            }
        }

        // 7. BFS reachability check from entry point (cycles are allowed)
        self.validate_reachability(entry)?;

        Ok(entry)
    }

    fn validate_node_ref(&self, name: &str, context: &str) -> Result<()> {
        if name == START || name == END {
            return Ok(());
        }
        if !self.vertices.contains_key(name) {
            return Err(GraphError::InvalidGraph(format!(
                "Unknown node '{name}' referenced as {context}"
            ))
            .into());
        }
        Ok(())
    }

    /// BFS from entry point to check that all nodes are reachable.
    fn validate_reachability(&self, entry: &str) -> Result<()> {
        let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adj.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        }
        adj.entry(START).or_default().push(entry);

        // A router without a path map may pick any node.
        let all_node_names: Vec<&str> = self.vertices.keys().map(|s| s.as_str()).collect();
        for ce in &self.conditional_edges {
            let targets: Vec<&str> = match ce.path_map() {
                Some(pm) => pm.values().map(|s| s.as_str()).collect(),
                None => {
                    let mut t = all_node_names.clone();
                    t.push(END);
                    t
                }
            };
            adj.entry(ce.from.as_str()).or_default().extend(targets);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(entry);
        visited.insert(entry);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = adj.get(current) {
                for &next in neighbors {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }

        for name in self.vertices.keys() {
            if !visited.contains(name.as_str()) {
                return Err(GraphError::InvalidGraph(format!(
                    "Node '{name}' is not reachable from entry point '{entry}'"
                ))
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::component::Ability;
    use crate::context::Context;
    use crate::node::NodeFn;

    fn noop() -> Arc<dyn Component> {
        Arc::new(NodeFn::new("noop", |inputs: Value, _ctx| async move { Ok(inputs) }))
    }

    fn add(graph: &mut Graph, name: &str) {
        graph.add_node(name, noop(), NodeSpec::new()).unwrap();
    }

    #[test]
    fn add_duplicate_node_errors() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        let result = graph.add_node("a", noop(), NodeSpec::new());
        assert!(result.err().unwrap().to_string().contains("Duplicate"));
    }

    #[test]
    fn add_node_reserved_errors() {
        let mut graph = Graph::new();
        for name in [START, END] {
            let result = graph.add_node(name, noop(), NodeSpec::new());
            assert!(result.err().unwrap().to_string().contains("reserved"));
        }
    }

    #[test]
    fn add_node_rejects_path_characters() {
        let mut graph = Graph::new();
        for name in ["", "a.b", "a[0]"] {
            assert!(graph.add_node(name, noop(), NodeSpec::new()).is_err());
        }
    }

    #[test]
    fn add_node_rejects_bad_schema() {
        let mut graph = Graph::new();
        let spec = NodeSpec::new().with_inputs(json!({"x": "${a..b}"}));
        assert!(graph.add_node("a", noop(), spec).is_err());
        assert!(!graph.contains_node("a"));
    }

    #[test]
    fn compile_without_entry_fails() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        let err = graph.compile().unwrap_err();
        assert!(err.to_string().contains("Entry point not set"));
    }

    #[test]
    fn compile_missing_entry_node_fails() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        graph.set_entry_point("ghost");
        assert!(graph.compile().unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn compile_unknown_edge_target_fails() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        graph.set_entry_point("a").add_edge("a", "ghost");
        let err = graph.compile().unwrap_err();
        assert!(err.to_string().contains("Unknown node 'ghost' referenced as edge target"));
    }

    #[test]
    fn compile_unreachable_node_fails() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        add(&mut graph, "island");
        graph.set_entry_point("a").set_finish_point("a");
        assert!(graph.compile().unwrap_err().to_string().contains("not reachable"));
    }

    #[test]
    fn conditional_edge_without_map_reaches_everything() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        add(&mut graph, "b");
        graph
            .set_entry_point("a")
            .add_conditional_edges(ConditionalEdge::new("a", |_: &Context| Ok("b".into()), None));
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn conditional_edge_unknown_mapped_target_fails() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        graph.set_entry_point("a").add_conditional_edges(ConditionalEdge::new(
            "a",
            |_: &Context| Ok("x".into()),
            Some(HashMap::from([("x".to_string(), "ghost".to_string())])),
        ));
        assert!(graph.compile().is_err());
    }

    #[test]
    fn stream_edge_requires_stream_abilities() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        add(&mut graph, "b");
        graph
            .set_entry_point("a")
            .add_edge("a", "b")
            .add_stream_edge("a", "b");
        assert!(graph.compile().unwrap_err().to_string().contains("neither streams"));

        let mut graph = Graph::new();
        graph
            .add_node("a", noop(), NodeSpec::new().with_abilities(&[Ability::Stream]))
            .unwrap();
        graph
            .add_node("b", noop(), NodeSpec::new().with_abilities(&[Ability::Collect]))
            .unwrap();
        graph
            .set_entry_point("a")
            .add_edge("a", "b")
            .add_stream_edge("a", "b");
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn stream_edge_unknown_node_fails() {
        let mut graph = Graph::new();
        add(&mut graph, "a");
        graph.set_entry_point("a").add_stream_edge("a", "ghost");
        assert!(graph.compile().is_err());
    }
}
