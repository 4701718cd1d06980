//! Per-invocation execution context.
//!
//! A [`Context`] carries everything a component may touch while it runs:
//! the shared [`State`], the graph-level config, the durable store, the
//! tracer, the stream writer and the checkpoint backend. Contexts nest:
//! `child(node_id)` derives the context of one node of the current graph,
//! extending its executable id with the node id.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Value, json};

use trellis_checkpoint::interrupt::{INTERACTION_KEY, Interrupt, history_path, queue_path};
use trellis_checkpoint::store::CheckpointStore;
use trellis_checkpoint::types::Outcome;
use trellis_core::config::RunConfig;
use trellis_core::error::Result;
use trellis_core::state::path::join;
use trellis_core::state::{NodeState, Scope, State};
use trellis_core::store::{MemoryStore, Store};
use trellis_core::stream::StreamWriterManager;
use trellis_core::tracer::{NoopTracer, Tracer};

use crate::schema::{GraphConfig, NodeSpec};

/// Answers and unanswered prompts of one node invocation.
#[derive(Debug, Default)]
struct Interaction {
    loaded: bool,
    asks: usize,
    history: Vec<Value>,
    queue: VecDeque<Value>,
}

#[derive(Clone)]
pub struct Context {
    node_id: String,
    executable_id: String,
    state: State,
    config: Arc<GraphConfig>,
    store: Arc<dyn Store>,
    tracer: Arc<dyn Tracer>,
    writer: StreamWriterManager,
    checkpointer: Option<Arc<dyn CheckpointStore>>,
    session_id: String,
    run_config: Arc<RunConfig>,
    parent: Option<Arc<Context>>,
    enclosing_loop: Option<String>,
    interaction: Arc<Mutex<Interaction>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("node_id", &self.node_id)
            .field("executable_id", &self.executable_id)
            .field("session_id", &self.session_id)
            .field("enclosing_loop", &self.enclosing_loop)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// A root context: no node, empty executable id, in-memory store,
    /// no tracer, streaming disabled and no checkpointing.
    pub fn new(state: State, session_id: impl Into<String>) -> Self {
        Self {
            node_id: String::new(),
            executable_id: String::new(),
            state,
            config: Arc::new(GraphConfig::default()),
            store: Arc::new(MemoryStore::new()),
            tracer: Arc::new(NoopTracer),
            writer: StreamWriterManager::disabled(),
            checkpointer: None,
            session_id: session_id.into(),
            run_config: Arc::new(RunConfig::default()),
            parent: None,
            enclosing_loop: None,
            interaction: Arc::default(),
        }
    }

    pub fn with_config(mut self, config: Arc<GraphConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_stream_writer(mut self, writer: StreamWriterManager) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn CheckpointStore>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn with_run_config(mut self, config: RunConfig) -> Self {
        self.run_config = Arc::new(config);
        self
    }

    /// Mark this context as running inside the loop `loop_id`.
    pub fn with_enclosing_loop(mut self, loop_id: impl Into<String>) -> Self {
        self.enclosing_loop = Some(loop_id.into());
        self
    }

    /// The context of node `node_id` of the graph this context runs.
    pub fn child(&self, node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            executable_id: join(&self.executable_id, &node_id),
            node_id,
            parent: Some(Arc::new(self.clone())),
            interaction: Arc::default(),
            ..self.clone()
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Dotted path of node ids from the root graph down to this node.
    pub fn executable_id(&self) -> &str {
        &self.executable_id
    }

    pub fn parent(&self) -> Option<&Context> {
        self.parent.as_deref()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// A state view whose writes are tagged with this executable id.
    pub fn node_state(&self) -> NodeState {
        self.state.node(self.executable_id.clone())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn node_spec(&self) -> NodeSpec {
        self.config.node(&self.node_id)
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn tracer(&self) -> &dyn Tracer {
        self.tracer.as_ref()
    }

    pub fn stream_writer(&self) -> &StreamWriterManager {
        &self.writer
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.checkpointer.as_ref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    /// Executable id of the innermost loop this context runs in.
    pub fn enclosing_loop(&self) -> Option<&str> {
        self.enclosing_loop.as_deref()
    }

    /// Ask the user for input.
    ///
    /// The k-th ask of an invocation is answered from the node's answer
    /// history when it has one, otherwise from the queue of supplied answers
    /// (recording it in the history). With neither available the call
    /// suspends with an interaction interrupt at index k.
    pub fn interact(&self, prompt: Value) -> Result<Outcome<Value>> {
        let mut interaction = self.interaction.lock().unwrap_or_else(PoisonError::into_inner);
        if !interaction.loaded {
            interaction.history = self.read_list(&history_path(&self.executable_id))?.into();
            interaction.queue = self.read_list(&queue_path(&self.executable_id))?.into();
            interaction.loaded = true;
        }

        let index = interaction.asks;
        interaction.asks += 1;

        if let Some(answer) = interaction.history.get(index) {
            return Ok(Outcome::Complete(answer.clone()));
        }
        if let Some(answer) = interaction.queue.pop_front() {
            interaction.history.push(answer.clone());
            return Ok(Outcome::Complete(answer));
        }

        tracing::debug!(node = %self.executable_id, index, "awaiting interaction");
        Ok(Outcome::Interrupted(vec![Interrupt::interaction(
            self.executable_id.clone(),
            index,
            prompt,
        )]))
    }

    fn read_list(&self, path: &str) -> Result<Vec<Value>> {
        Ok(match self.state.get(Scope::Comp, path)? {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        })
    }

    fn interaction_path(&self) -> String {
        join(&self.executable_id, INTERACTION_KEY)
    }

    /// Queue the node's answer history and unconsumed answers so a resumed
    /// invocation replays them.
    pub(crate) fn persist_interaction(&self) -> Result<()> {
        let interaction = self.interaction.lock().unwrap_or_else(PoisonError::into_inner);
        if !interaction.loaded {
            return Ok(());
        }
        let queue: Vec<Value> = interaction.queue.iter().cloned().collect();
        self.state.update_at(
            Scope::Comp,
            &self.executable_id,
            &self.interaction_path(),
            json!({"history": interaction.history, "queue": queue}),
        )
    }

    /// Drop the node's interaction bookkeeping once it has completed.
    pub(crate) fn clear_interaction(&self) -> Result<()> {
        let loaded = self
            .interaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded;
        let path = self.interaction_path();
        if loaded || self.state.get(Scope::Comp, &path)?.is_some_and(|v| !v.is_null()) {
            self.state
                .update_at(Scope::Comp, &self.executable_id, &path, Value::Null)?;
        }
        Ok(())
    }
}
