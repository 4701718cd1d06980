use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use trellis_core::error::Result;

use crate::store::CheckpointStore;
use crate::types::Checkpoint;

/// In-memory checkpoint store for testing and short-lived workflows.
///
/// Thread-safe via `RwLock`. All data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    /// Map: thread_id → checkpoints in write order, stably sorted by step.
    data: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let thread = data.entry(checkpoint.thread_id.clone()).or_default();

        // An overwrite counts as the newest write.
        thread.retain(|cp| !(cp.namespace == checkpoint.namespace && cp.id == checkpoint.id));
        thread.push(checkpoint);
        thread.sort_by_key(|cp| cp.step);
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(thread_id).and_then(|thread| {
            thread
                .iter()
                .find(|cp| cp.namespace == namespace && cp.id == checkpoint_id)
                .cloned()
        }))
    }

    async fn get_latest(&self, thread_id: &str, namespace: &str) -> Result<Option<Checkpoint>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(thread_id).and_then(|thread| {
            thread
                .iter()
                .rev()
                .find(|cp| cp.namespace == namespace)
                .cloned()
        }))
    }

    async fn list(&self, thread_id: &str, namespace: &str) -> Result<Vec<Checkpoint>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data
            .get(thread_id)
            .map(|thread| {
                thread
                    .iter()
                    .filter(|cp| cp.namespace == namespace)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn has_thread(&self, thread_id: &str) -> Result<bool> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(thread_id).is_some_and(|thread| !thread.is_empty()))
    }

    async fn delete_namespace(&self, thread_id: &str, namespace: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(thread) = data.get_mut(thread_id) {
            thread.retain(|cp| cp.namespace != namespace);
            if thread.is_empty() {
                data.remove(thread_id);
            }
        }
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(thread_id);
        Ok(())
    }
}
