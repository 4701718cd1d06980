pub mod config_ext;
pub mod interrupt;
pub mod memory;
pub mod serializer;
pub mod sqlite;
pub mod store;
pub mod types;

pub mod prelude {
    pub use crate::config_ext::CheckpointConfigExt;
    pub use crate::interrupt::{INTERACTION_SOURCE, InteractiveInput, Interrupt, config_keys};
    pub use crate::memory::MemoryCheckpointStore;
    pub use crate::serializer::{JsonSerializer, Serializer};
    pub use crate::sqlite::SqliteCheckpointStore;
    pub use crate::store::CheckpointStore;
    pub use crate::types::{Checkpoint, CheckpointMetadata, Outcome, TypedBlob};
}
