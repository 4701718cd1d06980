use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Streaming channel a chunk belongs to.
///
/// Multiple modes can be active simultaneously; the caller receives a
/// single multiplexed stream and filters by mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Node outputs, stream-ability chunks and interrupts.
    Output,
    /// Tracer events (node start/end, loop rounds).
    Trace,
    /// Free-form chunks written by components.
    Custom,
}

impl std::fmt::Display for StreamMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output => write!(f, "output"),
            Self::Trace => write!(f, "trace"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "output" => Ok(Self::Output),
            "trace" => Ok(Self::Trace),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown stream mode: '{other}'")),
        }
    }
}

/// A chunk emitted on the workflow stream, tagged by channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Output { source: String, payload: Value },
    Trace { event: String, payload: Value },
    Custom { source: String, payload: Value },
}

impl StreamChunk {
    pub fn mode(&self) -> StreamMode {
        match self {
            Self::Output { .. } => StreamMode::Output,
            Self::Trace { .. } => StreamMode::Trace,
            Self::Custom { .. } => StreamMode::Custom,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::Output { payload, .. }
            | Self::Trace { payload, .. }
            | Self::Custom { payload, .. } => payload,
        }
    }
}

/// Parse a comma-separated stream mode string (e.g. "output,trace").
///
/// Returns default `[Output]` if the input is empty.
pub fn parse_stream_modes(s: &str) -> Result<Vec<StreamMode>, String> {
    if s.is_empty() {
        return Ok(vec![StreamMode::Output]);
    }
    s.split(',')
        .map(|part| part.trim().parse::<StreamMode>())
        .collect()
}

/// Multiplexes output, trace and custom chunks onto one caller-facing
/// channel. Cloning shares the channel.
///
/// A disabled manager (the default for `invoke`) drops every chunk.
#[derive(Debug, Clone, Default)]
pub struct StreamWriterManager {
    sender: Option<mpsc::UnboundedSender<StreamChunk>>,
    modes: Arc<HashSet<StreamMode>>,
}

impl StreamWriterManager {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create a manager for the given modes together with the receiving end.
    pub fn new(modes: &[StreamMode]) -> (Self, mpsc::UnboundedReceiver<StreamChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            sender: Some(tx),
            modes: Arc::new(modes.iter().copied().collect()),
        };
        (manager, rx)
    }

    pub fn is_enabled(&self, mode: StreamMode) -> bool {
        self.sender.is_some() && self.modes.contains(&mode)
    }

    /// Send a chunk if its mode is enabled. Returns whether it was delivered.
    pub fn write(&self, chunk: StreamChunk) -> bool {
        if !self.is_enabled(chunk.mode()) {
            return false;
        }
        match &self.sender {
            Some(tx) => match tx.send(chunk) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("stream receiver dropped; chunk discarded");
                    false
                }
            },
            None => false,
        }
    }

    pub fn output(&self, source: impl Into<String>, payload: Value) -> bool {
        self.write(StreamChunk::Output {
            source: source.into(),
            payload,
        })
    }

    pub fn trace(&self, event: impl Into<String>, payload: Value) -> bool {
        self.write(StreamChunk::Trace {
            event: event.into(),
            payload,
        })
    }

    pub fn custom(&self, source: impl Into<String>, payload: Value) -> bool {
        self.write(StreamChunk::Custom {
            source: source.into(),
            payload,
        })
    }
}
