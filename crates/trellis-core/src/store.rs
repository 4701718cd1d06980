use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::state::path::{lookup, parse_path, remove, slot_mut};

/// Durable key-value store, decoupled from the in-memory execution state.
///
/// Keys use the same path grammar as state (`user.profile.name`).
#[async_trait]
pub trait Store: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>>;

    async fn write(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory [`Store`] backed by one nested JSON tree.
#[derive(Debug)]
pub struct MemoryStore {
    data: RwLock<Value>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            data: RwLock::new(Value::Object(Map::new())),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        let tokens = parse_path(key)?;
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(lookup(&data, &tokens).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        let tokens = parse_path(key)?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *slot_mut(&mut data, &tokens) = value;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let tokens = parse_path(key)?;
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        remove(&mut data, &tokens);
        Ok(())
    }
}
