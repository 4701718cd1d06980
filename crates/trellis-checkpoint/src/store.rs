use async_trait::async_trait;

use trellis_core::error::Result;

use crate::types::Checkpoint;

/// Async storage backend for checkpoints.
///
/// Checkpoints are addressed by `(thread_id, namespace, id)`. Within one
/// `(thread_id, namespace)` the latest checkpoint is the one with the highest
/// step, ties broken by write order. Implementations must isolate threads
/// from each other and be thread-safe (`Send + Sync`).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint. If a checkpoint with the same key exists, it is overwritten.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Retrieve a specific checkpoint.
    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>>;

    /// Retrieve the latest checkpoint of one graph level.
    async fn get_latest(&self, thread_id: &str, namespace: &str) -> Result<Option<Checkpoint>>;

    /// List the checkpoints of one graph level, oldest first.
    async fn list(&self, thread_id: &str, namespace: &str) -> Result<Vec<Checkpoint>>;

    /// Whether any checkpoint exists for the thread, in any namespace.
    async fn has_thread(&self, thread_id: &str) -> Result<bool>;

    /// Delete every checkpoint of one graph level.
    async fn delete_namespace(&self, thread_id: &str, namespace: &str) -> Result<()>;

    /// Delete all checkpoints for a given thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
}
