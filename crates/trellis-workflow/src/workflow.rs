use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use trellis_checkpoint::config_ext::CheckpointConfigExt;
use trellis_checkpoint::interrupt::{INTERACTION_SOURCE, InteractiveInput, Interrupt, queue_path};
use trellis_checkpoint::memory::MemoryCheckpointStore;
use trellis_checkpoint::serializer::JsonSerializer;
use trellis_checkpoint::store::CheckpointStore;
use trellis_checkpoint::types::Outcome;
use trellis_core::config::RunConfig;
use trellis_core::error::{GraphError, Result};
use trellis_core::state::{Scope, State};
use trellis_core::store::{MemoryStore, Store};
use trellis_core::stream::{StreamChunk, StreamMode, StreamWriterManager};
use trellis_core::tracer::StreamTracer;
use trellis_graph::component::Component;
use trellis_graph::context::Context;
use trellis_graph::edge::ConditionalEdge;
use trellis_graph::executable::ExecutableGraph;
use trellis_graph::graph::Graph;
use trellis_graph::schema::NodeSpec;

/// Node id tagging the workflow's own input writes.
pub const INPUT_NODE: &str = "__input__";

/// What a workflow run starts from.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowInput {
    /// Top-level inputs of a fresh run, written at the io root.
    Inputs(Map<String, Value>),
    /// Answers resuming a suspended session.
    Interactive(InteractiveInput),
}

impl From<Map<String, Value>> for WorkflowInput {
    fn from(inputs: Map<String, Value>) -> Self {
        Self::Inputs(inputs)
    }
}

impl From<InteractiveInput> for WorkflowInput {
    fn from(answers: InteractiveInput) -> Self {
        Self::Interactive(answers)
    }
}

impl From<Value> for WorkflowInput {
    /// Objects become inputs; anything else is an empty input map.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Inputs(map),
            _ => Self::Inputs(Map::new()),
        }
    }
}

/// How a workflow run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutput {
    /// The end component's output.
    Completed(Map<String, Value>),
    /// The run is suspended until these interactions are answered.
    Interrupted(Vec<Interrupt>),
}

impl WorkflowOutput {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    pub fn interrupts(&self) -> &[Interrupt] {
        match self {
            Self::Completed(_) => &[],
            Self::Interrupted(interrupts) => interrupts,
        }
    }

    pub fn into_completed(self) -> Option<Map<String, Value>> {
        match self {
            Self::Completed(output) => Some(output),
            Self::Interrupted(_) => None,
        }
    }
}

/// A graph of components with a start and an end, runnable as a whole.
///
/// Sessions are identified by the run config's session id (falling back to
/// its run id). A run that suspends keeps its checkpoints under the session;
/// invoking again with [`WorkflowInput::Interactive`] on the same session
/// resumes it.
pub struct Workflow {
    graph: Graph,
    end: Option<String>,
    store: Arc<dyn Store>,
    checkpointer: Arc<dyn CheckpointStore>,
    compiled: OnceCell<Arc<ExecutableGraph>>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("graph", &self.graph)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            graph: Graph::new(),
            end: None,
            store: Arc::new(MemoryStore::new()),
            checkpointer: Arc::new(MemoryCheckpointStore::new()),
            compiled: OnceCell::new(),
        }
    }
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointStore>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    pub fn checkpointer(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpointer
    }

    fn touched(&mut self) -> &mut Graph {
        self.compiled = OnceCell::new();
        &mut self.graph
    }

    /// Register a component under `id`.
    pub fn add_workflow_comp(
        &mut self,
        id: impl Into<String>,
        component: Arc<dyn Component>,
        spec: NodeSpec,
    ) -> Result<&mut Self> {
        self.touched().add_node(id, component, spec)?;
        Ok(self)
    }

    /// Register the component the workflow starts at.
    pub fn set_start_comp(
        &mut self,
        id: impl Into<String>,
        component: Arc<dyn Component>,
        spec: NodeSpec,
    ) -> Result<&mut Self> {
        let id = id.into();
        self.add_workflow_comp(id.clone(), component, spec)?;
        self.graph.set_entry_point(id);
        Ok(self)
    }

    /// Register the component whose output is the workflow's output.
    pub fn set_end_comp(
        &mut self,
        id: impl Into<String>,
        component: Arc<dyn Component>,
        spec: NodeSpec,
    ) -> Result<&mut Self> {
        let id = id.into();
        self.add_workflow_comp(id.clone(), component, spec)?;
        self.graph.set_finish_point(id.clone());
        self.end = Some(id);
        Ok(self)
    }

    pub fn add_connection(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.touched().add_edge(from, to);
        self
    }

    pub fn add_conditional_connection(&mut self, edge: ConditionalEdge) -> &mut Self {
        self.touched().add_conditional_edges(edge);
        self
    }

    pub fn add_stream_connection(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> &mut Self {
        self.touched().add_stream_edge(from, to);
        self
    }

    /// Set a workflow environment variable, visible to every node's context.
    pub fn set_env(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.touched().set_env(key, value);
        self
    }

    async fn executable(&self) -> Result<Arc<ExecutableGraph>> {
        self.compiled
            .get_or_try_init(|| async { self.graph.clone().compile().map(Arc::new) })
            .await
            .cloned()
    }

    /// Run to completion or suspension.
    pub async fn invoke(
        &self,
        input: impl Into<WorkflowInput>,
        config: &RunConfig,
    ) -> Result<WorkflowOutput> {
        self.run(input.into(), config, StreamWriterManager::disabled())
            .await
    }

    /// Run while streaming chunks of the requested modes.
    ///
    /// An interrupt surfaces as an output chunk from the `__interaction__`
    /// source; a completed run ends with the end component's output chunk.
    pub fn stream<'a>(
        &'a self,
        input: impl Into<WorkflowInput>,
        config: &'a RunConfig,
        modes: &[StreamMode],
    ) -> BoxStream<'a, Result<StreamChunk>> {
        let input = input.into();
        let (writer, mut rx) = StreamWriterManager::new(modes);

        Box::pin(async_stream::try_stream! {
            let run = self.run(input, config, writer);
            tokio::pin!(run);

            loop {
                let step = tokio::select! {
                    chunk = rx.recv() => Step::Chunk(chunk),
                    result = &mut run => Step::Done(result),
                };
                match step {
                    Step::Chunk(Some(chunk)) => yield chunk,
                    Step::Chunk(None) => {}
                    Step::Done(result) => {
                        result?;
                        break;
                    }
                }
            }
            while let Ok(chunk) = rx.try_recv() {
                yield chunk;
            }
        })
    }

    async fn run(
        &self,
        input: WorkflowInput,
        config: &RunConfig,
        writer: StreamWriterManager,
    ) -> Result<WorkflowOutput> {
        let executable = self.executable().await?;
        let end = self
            .end
            .clone()
            .ok_or_else(|| GraphError::InvalidGraph("End component not set".to_string()))?;
        let session = config
            .session_id()
            .unwrap_or_else(|| config.run_id.to_string());

        let state = State::new();
        match input {
            WorkflowInput::Inputs(inputs) => {
                self.checkpointer.delete_thread(&session).await?;
                state.update(Scope::Io, INPUT_NODE, Value::Object(inputs))?;
                state.commit()?;
                tracing::info!(session = %session, tags = ?config.tags, "workflow started");
            }
            WorkflowInput::Interactive(answers) => {
                self.load_session(&state, &session, &answers).await?;
                let nodes: Vec<&String> = answers.iter().map(|(node, _)| node).collect();
                tracing::info!(session = %session, answered = ?nodes, "workflow resumed");
            }
        }

        let ctx = Context::new(state.clone(), session.clone())
            .with_store(self.store.clone())
            .with_tracer(Arc::new(StreamTracer::new(writer.clone())))
            .with_stream_writer(writer.clone())
            .with_checkpointer(self.checkpointer.clone())
            .with_run_config(config.clone());

        match executable.invoke(&ctx).await? {
            Outcome::Interrupted(interrupts) => {
                writer.output(INTERACTION_SOURCE, serde_json::to_value(&interrupts)?);
                tracing::info!(session = %session, count = interrupts.len(), "workflow interrupted");
                Ok(WorkflowOutput::Interrupted(interrupts))
            }
            Outcome::Complete(()) => {
                let output = match state.get(Scope::Io, &end)? {
                    Some(Value::Object(map)) => map,
                    Some(Value::Null) | None => Map::new(),
                    Some(other) => Map::from_iter([("output".to_string(), other)]),
                };
                self.checkpointer.delete_thread(&session).await?;
                writer.output(end.as_str(), Value::Object(output.clone()));
                tracing::info!(session = %session, "workflow finished");
                Ok(WorkflowOutput::Completed(output))
            }
        }
    }

    /// Restore the session's root checkpoint into `state`, queueing the
    /// answers before the saved pending updates are replayed.
    async fn load_session(
        &self,
        state: &State,
        session: &str,
        answers: &InteractiveInput,
    ) -> Result<()> {
        let checkpoint = self
            .checkpointer
            .get_latest(session, "")
            .await?
            .ok_or_else(|| GraphError::SessionNotFound(session.to_string()))?;

        if let Some(snapshot) = checkpoint.state(&JsonSerializer)? {
            state.restore(snapshot);
        }
        for (node, answer) in answers.iter() {
            let path = queue_path(node);
            let mut queue = match state.get(Scope::Comp, &path)? {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            queue.push(answer.clone());
            state.update_at(Scope::Comp, node, &path, Value::Array(queue))?;
        }
        state.commit()?;
        state.replay(checkpoint.state_updates(&JsonSerializer)?);
        Ok(())
    }
}

enum Step {
    Chunk(Option<StreamChunk>),
    Done(Result<WorkflowOutput>),
}
