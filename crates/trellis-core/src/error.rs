use thiserror::Error;

/// Numeric error codes, grouped by family.
pub mod codes {
    pub const STATE_INVALID_PATH: u32 = 10001;
    pub const STATE_INVALID_PATCH: u32 = 10002;

    pub const GRAPH_INVALID: u32 = 10101;
    pub const GRAPH_RECURSION_LIMIT: u32 = 10102;
    pub const GRAPH_UNSUPPORTED_ABILITY: u32 = 10103;
    pub const GRAPH_VERTEX_NOT_INITIALIZED: u32 = 10104;
    pub const GRAPH_STREAM: u32 = 10105;
    pub const GRAPH_INVALID_SCHEMA: u32 = 10106;

    pub const CONDITION_PARSE: u32 = 10201;
    pub const CONDITION_EVALUATION: u32 = 10202;
    pub const CONDITION_INVALID_ARRAY: u32 = 10203;

    pub const LOOP_ACCUMULATOR_CORRUPTED: u32 = 10301;
    pub const LOOP_NOT_IN_LOOP: u32 = 10302;

    pub const CHECKPOINT: u32 = 10401;
    pub const CHECKPOINT_SESSION_NOT_FOUND: u32 = 10402;

    pub const SERIALIZATION: u32 = 10901;
    pub const OTHER: u32 = 10999;
}

/// Top-level error type for the Trellis engine.
#[derive(Debug, Error)]
pub enum TrellisError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("Loop error: {0}")]
    Loop(#[from] LoopError),

    #[error("Component error: {0}")]
    Component(#[from] ComponentError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TrellisError {
    /// The numeric code of this error. Wrapped node failures report the code
    /// of the error they wrap.
    pub fn code(&self) -> u32 {
        match self {
            Self::State(e) => e.code(),
            Self::Graph(e) => e.code(),
            Self::Condition(e) => e.code(),
            Self::Loop(e) => e.code(),
            Self::Component(e) => e.code,
            Self::Serialization(_) => codes::SERIALIZATION,
            Self::Other(_) => codes::OTHER,
        }
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Patch from '{node}' must be a JSON object, got {found}")]
    InvalidPatch { node: String, found: String },
}

impl StateError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidPath { .. } => codes::STATE_INVALID_PATH,
            Self::InvalidPatch { .. } => codes::STATE_INVALID_PATCH,
        }
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid schema for '{node}': {detail}")]
    InvalidSchema { node: String, detail: String },

    #[error("Recursion limit ({limit}) exceeded")]
    RecursionLimit { limit: usize },

    #[error("Node '{node}' does not support ability '{ability}'")]
    UnsupportedAbility { node: String, ability: String },

    #[error("Vertex '{0}' is not initialized")]
    VertexNotInitialized(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("node '{node}' failed to {ability}, caused by {source}")]
    NodeExecution {
        node: String,
        ability: String,
        source: Box<TrellisError>,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl GraphError {
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidGraph(_) => codes::GRAPH_INVALID,
            Self::InvalidSchema { .. } => codes::GRAPH_INVALID_SCHEMA,
            Self::RecursionLimit { .. } => codes::GRAPH_RECURSION_LIMIT,
            Self::UnsupportedAbility { .. } => codes::GRAPH_UNSUPPORTED_ABILITY,
            Self::VertexNotInitialized(_) => codes::GRAPH_VERTEX_NOT_INITIALIZED,
            Self::Stream(_) => codes::GRAPH_STREAM,
            Self::NodeExecution { source, .. } => source.code(),
            Self::Checkpoint(_) => codes::CHECKPOINT,
            Self::SessionNotFound(_) => codes::CHECKPOINT_SESSION_NOT_FOUND,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Failed to parse expression '{expression}': {detail}")]
    Parse { expression: String, detail: String },

    #[error("Failed to evaluate expression '{expression}': {detail}")]
    Evaluation { expression: String, detail: String },

    #[error("Loop array '{source_ref}' is not a list")]
    InvalidArray { source_ref: String },
}

impl ConditionError {
    pub fn code(&self) -> u32 {
        match self {
            Self::Parse { .. } => codes::CONDITION_PARSE,
            Self::Evaluation { .. } => codes::CONDITION_EVALUATION,
            Self::InvalidArray { .. } => codes::CONDITION_INVALID_ARRAY,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Round accumulator at '{path}' is corrupted: expected a list, found {found}")]
    AccumulatorCorrupted { path: String, found: String },

    #[error("'{0}' is not running inside a loop")]
    NotInLoop(String),
}

impl LoopError {
    pub fn code(&self) -> u32 {
        match self {
            Self::AccumulatorCorrupted { .. } => codes::LOOP_ACCUMULATOR_CORRUPTED,
            Self::NotInLoop(_) => codes::LOOP_NOT_IN_LOOP,
        }
    }
}

/// Error raised by a component body, carrying a component-defined code.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct ComponentError {
    pub code: u32,
    pub message: String,
}

impl ComponentError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_display() {
        let err = StateError::invalid_path("a..b", "empty segment");
        assert_eq!(err.to_string(), "Invalid path 'a..b': empty segment");
    }

    #[test]
    fn graph_error_display() {
        let err = GraphError::RecursionLimit { limit: 25 };
        assert_eq!(err.to_string(), "Recursion limit (25) exceeded");
    }

    #[test]
    fn component_error_display() {
        let err = ComponentError::new(42, "bad input");
        assert_eq!(err.to_string(), "[42] bad input");
    }

    #[test]
    fn trellis_error_from_state_error() {
        let err: TrellisError = StateError::invalid_path("x[", "unclosed '['").into();
        assert!(matches!(err, TrellisError::State(StateError::InvalidPath { .. })));
        assert_eq!(err.code(), codes::STATE_INVALID_PATH);
    }

    #[test]
    fn trellis_error_from_condition_error() {
        let err: TrellisError = ConditionError::Parse {
            expression: "1 +".into(),
            detail: "eof".into(),
        }
        .into();
        assert!(matches!(err, TrellisError::Condition(_)));
        assert_eq!(err.code(), codes::CONDITION_PARSE);
    }

    #[test]
    fn trellis_error_from_loop_error() {
        let err: TrellisError = LoopError::AccumulatorCorrupted {
            path: "l.__round_results__".into(),
            found: "string".into(),
        }
        .into();
        assert_eq!(err.code(), codes::LOOP_ACCUMULATOR_CORRUPTED);
        assert!(err.to_string().contains("expected a list"));
    }

    #[test]
    fn node_execution_wraps_message_and_code() {
        let inner: TrellisError = ComponentError::new(7001, "upstream timeout").into();
        let err = GraphError::NodeExecution {
            node: "llm".into(),
            ability: "invoke".into(),
            source: Box::new(inner),
        };
        let text = err.to_string();
        assert!(text.starts_with("node 'llm' failed to invoke, caused by"));
        assert!(text.contains("upstream timeout"));
        assert_eq!(err.code(), 7001);
    }

    #[test]
    fn nested_node_execution_keeps_innermost_code() {
        let inner = GraphError::NodeExecution {
            node: "body".into(),
            ability: "invoke".into(),
            source: Box::new(ComponentError::new(55, "boom").into()),
        };
        let outer = GraphError::NodeExecution {
            node: "loop".into(),
            ability: "invoke".into(),
            source: Box::new(inner.into()),
        };
        assert_eq!(TrellisError::from(outer).code(), 55);
    }
}
