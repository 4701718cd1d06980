use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use trellis_checkpoint::types::Outcome;
use trellis_core::error::Result;

use crate::component::Component;
use crate::context::Context;

type AsyncNodeFn =
    dyn Fn(Value, Context) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync;

/// An invoke-only component wrapping an async function.
///
/// The function receives the node's resolved inputs and its context, and
/// returns the node's raw output.
#[derive(Clone)]
pub struct NodeFn {
    name: String,
    func: Arc<AsyncNodeFn>,
}

impl NodeFn {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |inputs, ctx| Box::pin(func(inputs, ctx))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Component for NodeFn {
    async fn invoke(&self, inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        (self.func)(inputs, ctx.clone()).await.map(Outcome::Complete)
    }
}
