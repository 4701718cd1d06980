use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trellis_core::error::Result;
use trellis_core::state::{PendingUpdates, StateSnapshot};

use crate::interrupt::Interrupt;
use crate::serializer::Serializer;

/// Blob key for the committed state trees.
pub const STATE_BLOB: &str = "state";
/// Blob key for the pending state journals.
pub const STATE_UPDATES_BLOB: &str = "state_updates";

/// Serialized bytes together with the tag of the serializer that wrote them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedBlob {
    pub type_tag: String,
    pub bytes: Vec<u8>,
}

/// A snapshot of one graph level at a super-step boundary.
///
/// Keyed by `(thread_id, namespace, id)`. The namespace is the executable id
/// of the graph level (`""` at the workflow root).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique identifier for this checkpoint.
    pub id: String,
    /// Session identifier. Multiple checkpoints share a thread.
    pub thread_id: String,
    /// Graph level this checkpoint belongs to.
    #[serde(default)]
    pub namespace: String,
    /// Parent checkpoint ID, forming a linked-list history.
    pub parent_id: Option<String>,
    /// The super-step number at which this checkpoint was taken.
    pub step: usize,
    /// Nodes to execute when resuming from this checkpoint.
    pub pending_nodes: Vec<String>,
    /// Partially satisfied fan-in barriers: target → predecessors already done.
    #[serde(default)]
    pub barriers: BTreeMap<String, Vec<String>>,
    /// Serialized payloads (`"state"`, `"state_updates"`).
    #[serde(default)]
    pub blobs: BTreeMap<String, TypedBlob>,
    /// Metadata about the checkpoint.
    pub metadata: CheckpointMetadata,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

/// Metadata describing how a checkpoint was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Source of the checkpoint: "input", "loop", or "interrupt".
    pub source: String,
    /// The execution step number.
    pub step: usize,
    /// The node that was just executed (if applicable).
    pub node_name: Option<String>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, namespace: impl Into<String>, step: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.into(),
            namespace: namespace.into(),
            parent_id: None,
            step,
            pending_nodes: Vec::new(),
            barriers: BTreeMap::new(),
            blobs: BTreeMap::new(),
            metadata: CheckpointMetadata {
                source: "loop".into(),
                step,
                node_name: None,
            },
            created_at: Utc::now(),
        }
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }

    pub fn with_pending_nodes(mut self, nodes: Vec<String>) -> Self {
        self.pending_nodes = nodes;
        self
    }

    pub fn with_barriers(mut self, barriers: BTreeMap<String, Vec<String>>) -> Self {
        self.barriers = barriers;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>, node_name: Option<String>) -> Self {
        self.metadata.source = source.into();
        self.metadata.node_name = node_name;
        self
    }

    /// Serialize `value` into the blob named `key`.
    pub fn put_blob<S: Serializer, T: Serialize>(
        &mut self,
        serializer: &S,
        key: &str,
        value: &T,
    ) -> Result<()> {
        self.blobs.insert(key.to_string(), serializer.dumps(value)?);
        Ok(())
    }

    /// Decode the blob named `key`, if present.
    pub fn blob<S: Serializer, T: for<'de> Deserialize<'de>>(
        &self,
        serializer: &S,
        key: &str,
    ) -> Result<Option<T>> {
        self.blobs
            .get(key)
            .map(|blob| serializer.loads(blob))
            .transpose()
    }

    /// Store committed trees and pending journals.
    pub fn with_state<S: Serializer>(
        mut self,
        serializer: &S,
        snapshot: &StateSnapshot,
        pending: &PendingUpdates,
    ) -> Result<Self> {
        self.put_blob(serializer, STATE_BLOB, snapshot)?;
        self.put_blob(serializer, STATE_UPDATES_BLOB, pending)?;
        Ok(self)
    }

    pub fn state<S: Serializer>(&self, serializer: &S) -> Result<Option<StateSnapshot>> {
        self.blob(serializer, STATE_BLOB)
    }

    pub fn state_updates<S: Serializer>(&self, serializer: &S) -> Result<PendingUpdates> {
        Ok(self
            .blob(serializer, STATE_UPDATES_BLOB)?
            .unwrap_or_default())
    }
}

/// The outcome of a resumable execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Execution ran to completion.
    Complete(T),
    /// Execution paused waiting for external input.
    Interrupted(Vec<Interrupt>),
}

impl<T> Outcome<T> {
    /// Returns `true` if execution completed normally.
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Complete(_))
    }

    /// Returns `true` if execution was interrupted.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Outcome::Interrupted(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Complete(value) => Outcome::Complete(f(value)),
            Outcome::Interrupted(interrupts) => Outcome::Interrupted(interrupts),
        }
    }

    pub fn interrupts(&self) -> &[Interrupt] {
        match self {
            Outcome::Complete(_) => &[],
            Outcome::Interrupted(interrupts) => interrupts,
        }
    }

    /// The completed value, if any.
    pub fn into_complete(self) -> Option<T> {
        match self {
            Outcome::Complete(value) => Some(value),
            Outcome::Interrupted(_) => None,
        }
    }
}
