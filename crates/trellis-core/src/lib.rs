pub mod config;
pub mod error;
pub mod state;
pub mod store;
pub mod stream;
pub mod tracer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::RunConfig;
    pub use crate::error::{
        ComponentError, ConditionError, GraphError, LoopError, Result, StateError, TrellisError,
    };
    pub use crate::state::{NodeState, PendingUpdates, Scope, State, StateSnapshot};
    pub use crate::store::{MemoryStore, Store};
    pub use crate::stream::{StreamChunk, StreamMode, StreamWriterManager};
    pub use crate::tracer::{NoopTracer, StreamTracer, Tracer};
}
