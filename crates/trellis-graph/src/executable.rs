use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use trellis_checkpoint::serializer::JsonSerializer;
use trellis_checkpoint::store::CheckpointStore;
use trellis_checkpoint::types::{Checkpoint, Outcome};
use trellis_core::error::{GraphError, Result};

use crate::constants::END;
use crate::context::Context;
use crate::edge::ConditionalEdge;
use crate::schema::GraphConfig;
use crate::vertex::{Vertex, VertexIo};

/// A compiled graph ready for execution.
///
/// Created by [`Graph::compile`](crate::graph::Graph::compile). Runs as a
/// super-step loop: every node of the ready set is called, then the nodes
/// routed to by the completed ones form the next ready set. With a
/// checkpointer in the context, a checkpoint is written at every super-step
/// boundary and on interrupt, under the namespace of the context's
/// executable id; a later run of the same level resumes from it.
pub struct ExecutableGraph {
    vertices: HashMap<String, Vertex>,
    adjacency: HashMap<String, Vec<String>>,
    conditional_edges: Vec<ConditionalEdge>,
    predecessors: HashMap<String, Vec<String>>,
    config: Arc<GraphConfig>,
    entry_point: String,
}

impl std::fmt::Debug for ExecutableGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableGraph")
            .field("nodes", &self.node_names())
            .field("entry_point", &self.entry_point)
            .finish_non_exhaustive()
    }
}

impl ExecutableGraph {
    pub(crate) fn new(
        vertices: HashMap<String, Vertex>,
        adjacency: HashMap<String, Vec<String>>,
        conditional_edges: Vec<ConditionalEdge>,
        predecessors: HashMap<String, Vec<String>>,
        config: Arc<GraphConfig>,
        entry_point: String,
    ) -> Self {
        Self {
            vertices,
            adjacency,
            conditional_edges,
            predecessors,
            config,
            entry_point,
        }
    }

    /// Names of all nodes, sorted.
    pub fn node_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vertices.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get the static edges from a given node.
    pub fn edges_from(&self, node: &str) -> &[String] {
        self.adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Predecessors a fan-in node waits for, if it waits at all.
    pub fn barrier_of(&self, node: &str) -> Option<&[String]> {
        self.predecessors.get(node).map(|v| v.as_slice())
    }

    /// Determine the next nodes to execute after a given node.
    fn next_nodes(&self, current: &str, ctx: &Context) -> Result<Vec<String>> {
        // Conditional edges take priority
        if let Some(ce) = self.conditional_edges.iter().find(|ce| ce.from == current) {
            let target = ce.resolve(ctx)?;
            if target == END {
                return Ok(Vec::new());
            }
            if !self.vertices.contains_key(&target) {
                return Err(GraphError::InvalidGraph(format!(
                    "Router of '{current}' chose unknown node '{target}'"
                ))
                .into());
            }
            return Ok(vec![target]);
        }

        Ok(self
            .edges_from(current)
            .iter()
            .filter(|t| *t != END)
            .cloned()
            .collect())
    }

    /// Run the graph within `ctx`, resuming from this level's latest
    /// checkpoint when one exists.
    pub async fn invoke(&self, ctx: &Context) -> Result<Outcome<()>> {
        let ctx = ctx.clone().with_config(self.config.clone());
        let namespace = ctx.executable_id().to_string();
        let limit = ctx.run_config().recursion_limit;
        let checkpointer = ctx.checkpointer().cloned();

        let resumed = match &checkpointer {
            Some(store) => store.get_latest(ctx.session_id(), &namespace).await?,
            None => None,
        };
        let (mut ready, mut barriers, mut step, mut parent_id) = match resumed {
            Some(cp) => {
                tracing::debug!(namespace = %namespace, step = cp.step, pending = ?cp.pending_nodes, "resuming graph");
                (cp.pending_nodes, cp.barriers, cp.step, Some(cp.id))
            }
            None => (vec![self.entry_point.clone()], BTreeMap::new(), 0, None),
        };

        let mut queues = StreamQueues::new(&self.config);

        while !ready.is_empty() {
            ready = stream_order(&self.config, ready);
            if step >= limit {
                return Err(GraphError::RecursionLimit { limit }.into());
            }
            tracing::debug!(namespace = %namespace, step, ready = ?ready, "super-step");

            let mut next: Vec<String> = Vec::new();
            let mut unfinished: Vec<String> = Vec::new();
            let mut interrupts = Vec::new();

            for name in &ready {
                let vertex = self.vertices.get(name).ok_or_else(|| {
                    GraphError::InvalidGraph(format!("Node '{name}' not found during execution"))
                })?;

                match vertex.call(&ctx, queues.wire(name)).await? {
                    Outcome::Interrupted(list) => {
                        interrupts.extend(list);
                        unfinished.push(name.clone());
                    }
                    Outcome::Complete(()) => {
                        for target in self.next_nodes(name, &ctx)? {
                            match self.predecessors.get(&target) {
                                Some(preds) => {
                                    let arrived = barriers.entry(target.clone()).or_default();
                                    if !arrived.contains(name) {
                                        arrived.push(name.clone());
                                    }
                                    if preds.iter().all(|p| arrived.contains(p)) {
                                        barriers.remove(&target);
                                        next.push(target);
                                    }
                                }
                                None => next.push(target),
                            }
                        }
                    }
                }
            }

            next.sort();
            next.dedup();
            step += 1;

            if !interrupts.is_empty() {
                unfinished.extend(next);
                unfinished.sort();
                unfinished.dedup();
                if let Some(store) = &checkpointer {
                    let cp = snapshot(&ctx, &namespace, step, parent_id.take(), unfinished, &barriers)?
                        .with_source("interrupt", interrupts.first().map(|i| i.node_id().to_string()));
                    store.put(cp).await?;
                }
                tracing::info!(namespace = %namespace, count = interrupts.len(), "graph interrupted");
                return Ok(Outcome::Interrupted(interrupts));
            }

            ready = next;
            if let Some(store) = checkpointer.as_ref().filter(|_| !ready.is_empty()) {
                let cp = snapshot(&ctx, &namespace, step, parent_id.take(), ready.clone(), &barriers)?;
                parent_id = Some(cp.id.clone());
                store.put(cp).await?;
            }
        }

        if let Some(store) = &checkpointer {
            store.delete_namespace(ctx.session_id(), &namespace).await?;
        }
        Ok(Outcome::Complete(()))
    }
}

/// Order one super-step so every stream producer in it runs before its
/// consumers. Otherwise name order; a stream cycle falls back to it too.
fn stream_order(config: &GraphConfig, mut ready: Vec<String>) -> Vec<String> {
    ready.sort();
    let edges: Vec<&(String, String)> = config
        .stream_edges()
        .iter()
        .filter(|(from, to)| from != to && ready.contains(from) && ready.contains(to))
        .collect();
    if edges.is_empty() {
        return ready;
    }

    let mut ordered = Vec::with_capacity(ready.len());
    while !ready.is_empty() {
        let free = ready.iter().position(|node| {
            !edges
                .iter()
                .any(|(from, to)| to == node && ready.contains(from))
        });
        ordered.push(ready.remove(free.unwrap_or(0)));
    }
    ordered
}

fn snapshot(
    ctx: &Context,
    namespace: &str,
    step: usize,
    parent_id: Option<String>,
    pending_nodes: Vec<String>,
    barriers: &BTreeMap<String, Vec<String>>,
) -> Result<Checkpoint> {
    Checkpoint::new(ctx.session_id(), namespace, step)
        .with_parent(parent_id)
        .with_pending_nodes(pending_nodes)
        .with_barriers(barriers.clone())
        .with_state(&JsonSerializer, &ctx.state().snapshot(), &ctx.state().pending())
}

/// Per-run chunk queues, one per stream-edge target.
struct StreamQueues {
    senders: HashMap<String, UnboundedSender<Value>>,
    receivers: HashMap<String, UnboundedReceiver<Value>>,
    targets: HashMap<String, Vec<String>>,
}

impl StreamQueues {
    fn new(config: &GraphConfig) -> Self {
        let mut queues = Self {
            senders: HashMap::new(),
            receivers: HashMap::new(),
            targets: HashMap::new(),
        };
        for (from, to) in config.stream_edges() {
            queues.targets.entry(from.clone()).or_default().push(to.clone());
            if !queues.senders.contains_key(to) {
                let (tx, rx) = mpsc::unbounded_channel();
                queues.senders.insert(to.clone(), tx);
                queues.receivers.insert(to.clone(), rx);
            }
        }
        queues
    }

    /// Channels for one call of `node`. The node's own queue is closed to
    /// new producers first, so it ends once earlier producers are done.
    fn wire(&mut self, node: &str) -> VertexIo {
        self.senders.remove(node);
        let stream_in = self.receivers.remove(node);
        let stream_out = self
            .targets
            .get(node)
            .map(|targets| {
                targets
                    .iter()
                    .filter_map(|t| self.senders.get(t).cloned())
                    .collect()
            })
            .unwrap_or_default();
        VertexIo {
            stream_in,
            stream_out,
        }
    }
}
