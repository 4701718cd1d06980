use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use trellis_checkpoint::types::Outcome;
use trellis_core::error::Result;
use trellis_core::state::Scope;

use crate::component::Component;
use crate::context::Context;
use crate::executable::ExecutableGraph;

/// Runs a compiled graph as a single node of a parent graph.
///
/// Inner node ids are scoped under the sub-graph node, so `inner` of
/// sub-graph `sub` writes io-state at `sub.inner`. The node completes with
/// its io subtree, or with `output` resolved against state when given.
/// An interrupt inside the sub-graph suspends the parent too; the inner
/// graph checkpoints under its own namespace and resumes from there.
pub struct SubGraphComponent {
    graph: Arc<ExecutableGraph>,
    output: Option<Value>,
}

impl std::fmt::Debug for SubGraphComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubGraphComponent")
            .field("graph", &self.graph)
            .field("output", &self.output)
            .finish()
    }
}

impl SubGraphComponent {
    pub fn new(graph: ExecutableGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            output: None,
        }
    }

    /// Complete with `schema` resolved after the inner run instead of the
    /// whole io subtree.
    pub fn with_output(mut self, schema: Value) -> Self {
        self.output = Some(schema);
        self
    }
}

#[async_trait]
impl Component for SubGraphComponent {
    async fn invoke(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        if let Outcome::Interrupted(interrupts) = self.graph.invoke(ctx).await? {
            return Ok(Outcome::Interrupted(interrupts));
        }
        ctx.state().commit()?;

        let output = match &self.output {
            Some(schema) => ctx.state().resolve(schema)?,
            None => ctx
                .node_state()
                .get_own(Scope::Io, "")?
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| json!({})),
        };
        Ok(Outcome::Complete(output))
    }
}
