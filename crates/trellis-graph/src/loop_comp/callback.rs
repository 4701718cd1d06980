use async_trait::async_trait;
use serde_json::Value;

use trellis_core::error::{LoopError, Result};
use trellis_core::state::Scope;
use trellis_core::state::path::{join, type_name};

use crate::context::Context;

/// Comp-state key under the loop holding per-round accumulators.
pub const ROUND_RESULTS_KEY: &str = "__round_results__";

/// Io-state key under the loop holding loop-local working variables.
pub const INTERMEDIATE_KEY: &str = "intermediateLoopVar";

/// Hooks dispatched by the loop router, always in the loop's context.
///
/// On each tick, `end_round` closes the previous round (skipped on the first
/// tick after entry). A continuing tick then calls `first_in_loop` (entry
/// only) and `start_round`; an exiting tick calls `out_loop`.
#[async_trait]
pub trait LoopCallback: Send + Sync {
    async fn first_in_loop(&self, ctx: &Context) -> Result<()>;

    async fn out_loop(&self, ctx: &Context) -> Result<()>;

    async fn start_round(&self, ctx: &Context) -> Result<()>;

    async fn end_round(&self, ctx: &Context) -> Result<()>;
}

/// Collects one value per round and publishes the sequences on exit.
///
/// Each output is a key and a schema resolved at the end of every round
/// (typically a `${loop.body.field}` reference). Round values are always
/// appended as list elements, whatever their shape. On exit the lists are
/// written to io-state at `<loop>.<key>`.
#[derive(Debug, Clone, Default)]
pub struct OutputCallback {
    outputs: Vec<(String, Value)>,
}

impl OutputCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: impl Into<String>, schema: Value) -> Self {
        self.outputs.push((key.into(), schema));
        self
    }

    fn accumulated(&self, ctx: &Context, key: &str) -> Result<(String, Vec<Value>)> {
        let path = format!("{ROUND_RESULTS_KEY}.{key}");
        match ctx.node_state().get_own(Scope::Comp, &path)? {
            None | Some(Value::Null) => Ok((path, Vec::new())),
            Some(Value::Array(items)) => Ok((path, items)),
            Some(other) => Err(LoopError::AccumulatorCorrupted {
                path: join(ctx.executable_id(), &path),
                found: type_name(&other).to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl LoopCallback for OutputCallback {
    async fn first_in_loop(&self, ctx: &Context) -> Result<()> {
        ctx.node_state()
            .update_own_at(Scope::Comp, ROUND_RESULTS_KEY, Value::Null)?;
        ctx.state().commit_scope(Scope::Comp)
    }

    async fn out_loop(&self, ctx: &Context) -> Result<()> {
        let node = ctx.node_state();
        for (key, _) in &self.outputs {
            let (_, items) = self.accumulated(ctx, key)?;
            node.update_own_at(Scope::Io, key, Value::Array(items))?;
        }
        node.update_own_at(Scope::Comp, ROUND_RESULTS_KEY, Value::Null)
    }

    async fn start_round(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn end_round(&self, ctx: &Context) -> Result<()> {
        let node = ctx.node_state();
        for (key, schema) in &self.outputs {
            let value = ctx.state().resolve(schema)?;
            let (path, mut items) = self.accumulated(ctx, key)?;
            items.push(value);
            node.update_own_at(Scope::Comp, &path, Value::Array(items))?;
        }
        ctx.state().commit_scope(Scope::Comp)
    }
}

/// Seeds loop-local variables at `<loop>.intermediateLoopVar.<key>` on
/// entry and clears them on exit. Body nodes read and overwrite them
/// through ordinary references.
#[derive(Debug, Clone, Default)]
pub struct IntermediateLoopVarCallback {
    vars: Vec<(String, Value)>,
}

impl IntermediateLoopVarCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, initial: Value) -> Self {
        self.vars.push((key.into(), initial));
        self
    }
}

#[async_trait]
impl LoopCallback for IntermediateLoopVarCallback {
    async fn first_in_loop(&self, ctx: &Context) -> Result<()> {
        let node = ctx.node_state();
        for (key, initial) in &self.vars {
            let value = ctx.state().resolve(initial)?;
            node.update_own_at(Scope::Io, &format!("{INTERMEDIATE_KEY}.{key}"), value)?;
        }
        Ok(())
    }

    async fn out_loop(&self, ctx: &Context) -> Result<()> {
        ctx.node_state()
            .update_own_at(Scope::Io, INTERMEDIATE_KEY, Value::Null)
    }

    async fn start_round(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn end_round(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}
