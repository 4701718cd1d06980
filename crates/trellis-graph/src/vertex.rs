//! Execution wrapper around one graph node.
//!
//! A call runs the node's synchronous abilities (`invoke`, `stream`) on the
//! calling task and its stream-consuming abilities (`collect`, `transform`)
//! on a spawned task fed from the node's chunk queue. The call completes
//! once both paths have finished. Outputs are written to io-state under the
//! node's executable id and committed unless the node skips commits.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use trellis_checkpoint::interrupt::Interrupt;
use trellis_checkpoint::types::Outcome;
use trellis_core::error::{GraphError, Result, TrellisError};
use trellis_core::state::Scope;
use trellis_core::state::path::deep_merge;

use crate::component::{Ability, ChunkStream, Component};
use crate::constants::{LOOP_ID, LOOP_INDEX};
use crate::context::Context;
use crate::schema::NodeSpec;

/// Chunk channels wired to one vertex call.
#[derive(Debug, Default)]
pub struct VertexIo {
    /// Chunks arriving over incoming stream edges.
    pub stream_in: Option<UnboundedReceiver<Value>>,
    /// Queues of the targets of outgoing stream edges.
    pub stream_out: Vec<UnboundedSender<Value>>,
}

#[derive(Clone)]
pub struct Vertex {
    node_id: String,
    component: Option<Arc<dyn Component>>,
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("node_id", &self.node_id)
            .field("bound", &self.component.is_some())
            .finish()
    }
}

impl Vertex {
    /// An unbound vertex. Calling it fails until a component is bound.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            component: None,
        }
    }

    pub fn bind(mut self, component: Arc<dyn Component>) -> Self {
        self.component = Some(component);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_bound(&self) -> bool {
        self.component.is_some()
    }

    /// Run the node inside the graph whose context is `parent`.
    pub async fn call(&self, parent: &Context, io: VertexIo) -> Result<Outcome<()>> {
        let component = self
            .component
            .clone()
            .ok_or_else(|| GraphError::VertexNotInitialized(self.node_id.clone()))?;
        let ctx = parent.child(self.node_id.clone());
        let spec = ctx.node_spec();
        let exec_id = ctx.executable_id().to_string();

        if !spec.skip_trace {
            ctx.tracer()
                .trigger("node", "on_start", trace_fields(&ctx, Map::new()));
        }
        tracing::debug!(node = %exec_id, abilities = ?spec.abilities, "vertex call");

        let VertexIo {
            stream_in,
            stream_out,
        } = io;

        let mut stream_task = spec.abilities.reads_stream().then(|| {
            let rx = stream_in.unwrap_or_else(closed_queue);
            tokio::spawn(run_stream_in(
                component.clone(),
                ctx.clone(),
                spec.clone(),
                rx,
                stream_out.clone(),
            ))
        });

        let ran = run_abilities(&component, &ctx, &spec, stream_out, &mut stream_task).await;
        let (inputs, outputs, interrupts) = match ran {
            Ok(ran) => ran,
            Err(err) => {
                if let Some(handle) = stream_task.take() {
                    handle.abort();
                    let _ = handle.await;
                }
                ctx.state().rollback(&exec_id);
                tracing::debug!(node = %exec_id, error = %err, "vertex failed");
                return Err(err);
            }
        };

        if !interrupts.is_empty() {
            // Only the interaction bookkeeping survives a suspended call.
            ctx.state().rollback(&exec_id);
            ctx.persist_interaction()?;
            ctx.state().commit()?;
            tracing::debug!(node = %exec_id, count = interrupts.len(), "vertex interrupted");
            return Ok(Outcome::Interrupted(interrupts));
        }

        ctx.clear_interaction()?;
        // The node's io is exactly its latest output, not a merge with
        // earlier calls.
        ctx.state()
            .update_at(Scope::Io, &exec_id, &exec_id, Value::Null)?;
        ctx.state()
            .update_at(Scope::Io, &exec_id, &exec_id, outputs.clone())?;
        if !spec.skip_commit {
            ctx.state().commit()?;
        }

        if !spec.skip_trace {
            let mut fields = Map::new();
            fields.insert("inputs".into(), inputs);
            fields.insert("outputs".into(), outputs);
            ctx.tracer()
                .trigger("node", "on_end", trace_fields(&ctx, fields));
        }
        Ok(Outcome::Complete(()))
    }
}

/// Run the synchronous abilities, then wait for the stream-consuming task.
/// Returns the resolved inputs, the merged outputs and any interrupts.
async fn run_abilities(
    component: &Arc<dyn Component>,
    ctx: &Context,
    spec: &NodeSpec,
    stream_out: Vec<UnboundedSender<Value>>,
    stream_task: &mut Option<JoinHandle<Result<Outcome<Value>>>>,
) -> Result<(Value, Value, Vec<Interrupt>)> {
    let exec_id = ctx.executable_id();
    let mut interrupts: Vec<Interrupt> = Vec::new();
    let mut inputs = Value::Null;
    let mut outputs = Value::Null;

    for ability in spec.abilities.iter().filter(|a| !a.reads_stream()) {
        let resolved = spec
            .resolve_inputs(ctx.state())
            .map_err(|e| wrap(exec_id, ability, e))?;
        inputs = resolved.clone();
        let outcome = match ability {
            Ability::Invoke => component.invoke(resolved, ctx).await,
            _ => run_stream(component.as_ref(), ctx, resolved, &stream_out).await,
        }
        .map_err(|e| wrap(exec_id, ability, e))?;

        match outcome {
            Outcome::Complete(raw) => {
                outputs = write_outputs(ctx, spec, raw).map_err(|e| wrap(exec_id, ability, e))?;
            }
            Outcome::Interrupted(list) => interrupts.extend(list),
        }
    }
    drop(stream_out);

    if let Some(handle) = stream_task.take() {
        let outcome = handle
            .await
            .map_err(|e| GraphError::Stream(format!("stream task of '{exec_id}' failed: {e}")))??;
        match outcome {
            Outcome::Complete(filtered) => {
                if outputs.is_null() {
                    outputs = filtered;
                } else {
                    deep_merge(&mut outputs, filtered);
                }
            }
            Outcome::Interrupted(list) => interrupts.extend(list),
        }
    }
    Ok((inputs, outputs, interrupts))
}

fn wrap(node: &str, ability: Ability, source: TrellisError) -> TrellisError {
    GraphError::NodeExecution {
        node: node.to_string(),
        ability: ability.to_string(),
        source: Box::new(source),
    }
    .into()
}

fn closed_queue() -> UnboundedReceiver<Value> {
    let (_, rx) = mpsc::unbounded_channel();
    rx
}

fn trace_fields(ctx: &Context, mut fields: Map<String, Value>) -> Value {
    let global = |key: &str| {
        ctx.state()
            .get(Scope::Global, key)
            .ok()
            .flatten()
            .unwrap_or(Value::Null)
    };
    fields.insert("node".into(), json!(ctx.executable_id()));
    fields.insert("loop_id".into(), global(LOOP_ID));
    fields.insert("loop_index".into(), global(LOOP_INDEX));
    Value::Object(fields)
}

/// Queue `raw`, shaped by the output schema, under the node's executable id.
fn write_outputs(ctx: &Context, spec: &NodeSpec, raw: Value) -> Result<Value> {
    let filtered = spec.filter_outputs(raw)?;
    let exec_id = ctx.executable_id();
    ctx.state()
        .update_at(Scope::Io, exec_id, exec_id, filtered.clone())?;
    Ok(filtered)
}

async fn run_stream(
    component: &dyn Component,
    ctx: &Context,
    inputs: Value,
    targets: &[UnboundedSender<Value>],
) -> Result<Outcome<Value>> {
    match component.stream(inputs, ctx).await? {
        Outcome::Complete(chunks) => forward(chunks, ctx, targets).await.map(Outcome::Complete),
        Outcome::Interrupted(list) => Ok(Outcome::Interrupted(list)),
    }
}

/// Drain `chunks` into the downstream queues and the output stream.
/// Object chunks are deep-merged into the persisted output.
async fn forward(
    mut chunks: ChunkStream,
    ctx: &Context,
    targets: &[UnboundedSender<Value>],
) -> Result<Value> {
    let mut merged = Value::Object(Map::new());
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        for target in targets {
            // A closed queue means its consumer already ran.
            let _ = target.send(chunk.clone());
        }
        ctx.stream_writer()
            .output(ctx.executable_id(), chunk.clone());
        if chunk.is_object() {
            deep_merge(&mut merged, chunk);
        }
    }
    Ok(merged)
}

/// Duplicate one queue into two.
fn tee(mut rx: UnboundedReceiver<Value>) -> (UnboundedReceiver<Value>, UnboundedReceiver<Value>) {
    let (left_tx, left_rx) = mpsc::unbounded_channel();
    let (right_tx, right_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            let _ = left_tx.send(chunk.clone());
            let _ = right_tx.send(chunk);
        }
    });
    (left_rx, right_rx)
}

fn chunk_stream(rx: UnboundedReceiver<Value>) -> ChunkStream {
    UnboundedReceiverStream::new(rx).map(Ok).boxed()
}

async fn run_stream_in(
    component: Arc<dyn Component>,
    ctx: Context,
    spec: NodeSpec,
    rx: UnboundedReceiver<Value>,
    targets: Vec<UnboundedSender<Value>>,
) -> Result<Outcome<Value>> {
    let exec_id = ctx.executable_id().to_string();
    let collect = spec.abilities.contains(Ability::Collect);
    let transform = spec.abilities.contains(Ability::Transform);

    let (collect_rx, transform_rx) = match (collect, transform) {
        (true, true) => {
            let (a, b) = tee(rx);
            (Some(a), Some(b))
        }
        (true, false) => (Some(rx), None),
        (false, _) => (None, Some(rx)),
    };

    let mut interrupts = Vec::new();
    let mut outputs = Value::Null;

    if let Some(rx) = collect_rx {
        let outcome = component
            .collect(chunk_stream(rx), &ctx)
            .await
            .map_err(|e| wrap(&exec_id, Ability::Collect, e))?;
        match outcome {
            Outcome::Complete(raw) => {
                outputs = write_outputs(&ctx, &spec, raw)
                    .map_err(|e| wrap(&exec_id, Ability::Collect, e))?;
            }
            Outcome::Interrupted(list) => interrupts.extend(list),
        }
    }

    if let Some(rx) = transform_rx {
        let result = async {
            match component.transform(chunk_stream(rx), &ctx).await? {
                Outcome::Complete(chunks) => {
                    let merged = forward(chunks, &ctx, &targets).await?;
                    write_outputs(&ctx, &spec, merged).map(Outcome::Complete)
                }
                Outcome::Interrupted(list) => Ok(Outcome::Interrupted(list)),
            }
        }
        .await
        .map_err(|e| wrap(&exec_id, Ability::Transform, e))?;
        match result {
            Outcome::Complete(filtered) => {
                if outputs.is_null() {
                    outputs = filtered;
                } else {
                    deep_merge(&mut outputs, filtered);
                }
            }
            Outcome::Interrupted(list) => interrupts.extend(list),
        }
    }
    drop(targets);

    if interrupts.is_empty() {
        Ok(Outcome::Complete(outputs))
    } else {
        Ok(Outcome::Interrupted(interrupts))
    }
}
