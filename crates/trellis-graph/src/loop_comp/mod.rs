//! Loops: a body graph repeated while a condition holds.
//!
//! The loop node itself is a component. Each call ticks a router: it
//! evaluates the condition (a requested break forces `false`), dispatches
//! the callbacks, and either runs one more round of the body or exits. The
//! router's flags live in comp-state under `<loop>.__loop__` so a loop
//! interrupted mid-round resumes inside that same round.

pub mod callback;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use trellis_checkpoint::types::Outcome;
use trellis_core::error::{LoopError, Result};
use trellis_core::state::Scope;

use crate::component::Component;
use crate::condition::Condition;
use crate::constants::{LOOP_ID, LOOP_INDEX};
use crate::context::Context;
use crate::edge::ConditionalEdge;
use crate::executable::ExecutableGraph;
use crate::graph::Graph;
use crate::schema::NodeSpec;

pub use callback::{IntermediateLoopVarCallback, LoopCallback, OutputCallback};

/// Comp-state key under the loop holding its router flags.
pub const FLAGS_KEY: &str = "__loop__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LoopFlags {
    #[serde(default)]
    broken: bool,
    #[serde(default = "default_true")]
    first_in_loop: bool,
    #[serde(default)]
    in_round: bool,
    #[serde(default)]
    round: u64,
    /// Loop id and index of the enclosing loop, restored on exit.
    #[serde(default)]
    outer: Option<(Value, Value)>,
}

fn default_true() -> bool {
    true
}

impl Default for LoopFlags {
    fn default() -> Self {
        Self {
            broken: false,
            first_in_loop: true,
            in_round: false,
            round: 0,
            outer: None,
        }
    }
}

impl LoopFlags {
    fn load(ctx: &Context) -> Result<Self> {
        match ctx.node_state().get_own(Scope::Comp, FLAGS_KEY)? {
            Some(Value::Null) | None => Ok(Self::default()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    fn save(&self, ctx: &Context) -> Result<()> {
        ctx.node_state()
            .update_own_at(Scope::Comp, FLAGS_KEY, serde_json::to_value(self)?)
    }
}

/// Request that the innermost enclosing loop stop.
///
/// The current round still runs to completion; the loop exits at its next
/// condition tick. The flag is written as a pending update of the calling
/// node, so it takes effect when that node commits.
pub fn break_loop(ctx: &Context) -> Result<()> {
    let loop_id = ctx
        .enclosing_loop()
        .ok_or_else(|| LoopError::NotInLoop(ctx.executable_id().to_string()))?;
    ctx.state().update_at(
        Scope::Comp,
        ctx.executable_id(),
        &format!("{loop_id}.{FLAGS_KEY}.broken"),
        json!(true),
    )
}

/// The body of a loop: an ordinary graph whose node ids are scoped under
/// the loop node.
#[derive(Debug, Clone, Default)]
pub struct LoopGroup {
    graph: Graph,
}

impl LoopGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_component(
        &mut self,
        id: impl Into<String>,
        component: Arc<dyn Component>,
        spec: NodeSpec,
    ) -> Result<&mut Self> {
        self.graph.add_node(id, component, spec)?;
        Ok(self)
    }

    pub fn add_connection(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.graph.add_edge(from, to);
        self
    }

    pub fn add_conditional_connection(&mut self, edge: ConditionalEdge) -> &mut Self {
        self.graph.add_conditional_edges(edge);
        self
    }

    pub fn add_stream_connection(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> &mut Self {
        self.graph.add_stream_edge(from, to);
        self
    }

    pub fn start_comp(&mut self, id: impl Into<String>) -> &mut Self {
        self.graph.set_entry_point(id);
        self
    }

    pub fn end_comp(&mut self, id: impl Into<String>) -> &mut Self {
        self.graph.set_finish_point(id);
        self
    }

    pub fn compile(self) -> Result<ExecutableGraph> {
        self.graph.compile()
    }
}

/// A node that repeats a [`LoopGroup`] while its condition holds.
///
/// Completes with the loop's io subtree, which holds whatever the callbacks
/// published (for example [`OutputCallback`] sequences).
pub struct LoopComponent {
    body: Arc<ExecutableGraph>,
    condition: Arc<dyn Condition>,
    callbacks: Vec<Arc<dyn LoopCallback>>,
}

impl std::fmt::Debug for LoopComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopComponent")
            .field("body", &self.body)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl LoopComponent {
    pub fn new(body: LoopGroup, condition: impl Condition + 'static) -> Result<Self> {
        Ok(Self {
            body: Arc::new(body.compile()?),
            condition: Arc::new(condition),
            callbacks: Vec::new(),
        })
    }

    pub fn with_callback(mut self, callback: impl LoopCallback + 'static) -> Self {
        self.callbacks.push(Arc::new(callback));
        self
    }

    /// One router tick. Returns whether another round starts.
    async fn tick(&self, ctx: &Context, flags: &mut LoopFlags) -> Result<bool> {
        let go = !flags.broken && self.condition.evaluate(ctx).await?;
        let first = std::mem::replace(&mut flags.first_in_loop, false);

        for cb in &self.callbacks {
            if !first {
                cb.end_round(ctx).await?;
            }
            if go {
                if first {
                    cb.first_in_loop(ctx).await?;
                }
                cb.start_round(ctx).await?;
            } else {
                cb.out_loop(ctx).await?;
            }
        }

        if go {
            flags.in_round = true;
            flags.round += 1;
            flags.save(ctx)?;
        } else {
            let outer = flags.outer.take();
            LoopFlags::default().save(ctx)?;
            self.condition.init(ctx).await?;
            *flags = LoopFlags {
                outer,
                ..LoopFlags::default()
            };
        }
        ctx.state().commit()?;
        Ok(go)
    }
}

#[async_trait]
impl Component for LoopComponent {
    async fn invoke(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        let loop_id = ctx.executable_id().to_string();
        let node = ctx.node_state();
        let mut flags = LoopFlags::load(ctx)?;

        if flags.first_in_loop && !flags.in_round {
            let read = |path: &str| -> Result<Value> {
                Ok(ctx.state().get(Scope::Global, path)?.unwrap_or(Value::Null))
            };
            flags.outer = Some((read(LOOP_ID)?, read(LOOP_INDEX)?));
            self.condition.init(ctx).await?;
        }

        let body_ctx = ctx.clone().with_enclosing_loop(loop_id.clone());
        loop {
            if !flags.in_round && !self.tick(ctx, &mut flags).await? {
                break;
            }

            node.update_at(Scope::Global, LOOP_ID, json!(loop_id))?;
            node.update_at(Scope::Global, LOOP_INDEX, json!(flags.round))?;
            ctx.state().commit()?;
            tracing::debug!(loop_id = %loop_id, round = flags.round, "loop round");

            match self.body.invoke(&body_ctx).await? {
                Outcome::Interrupted(interrupts) => return Ok(Outcome::Interrupted(interrupts)),
                Outcome::Complete(()) => {
                    ctx.state().commit()?;
                    flags.broken |= LoopFlags::load(ctx)?.broken;
                    flags.in_round = false;
                    flags.save(ctx)?;
                    ctx.state().commit()?;
                }
            }
        }

        let (outer_id, outer_index) = flags.outer.take().unwrap_or((Value::Null, Value::Null));
        node.update_at(Scope::Global, LOOP_ID, outer_id)?;
        node.update_at(Scope::Global, LOOP_INDEX, outer_index)?;
        ctx.state().commit()?;

        let output = node
            .get_own(Scope::Io, "")?
            .filter(|v| !v.is_null())
            .unwrap_or_else(|| json!({}));
        Ok(Outcome::Complete(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::FuncCondition;
    use crate::node::NodeFn;
    use trellis_core::error::codes;
    use trellis_core::state::State;

    #[test]
    fn flags_default_to_entry() {
        let flags: LoopFlags = serde_json::from_value(json!({})).unwrap();
        assert_eq!(flags, LoopFlags::default());
        assert!(flags.first_in_loop);
    }

    #[test]
    fn break_outside_loop_fails() {
        let ctx = Context::new(State::new(), "s").child("n");
        let err = break_loop(&ctx).unwrap_err();
        assert_eq!(err.code(), codes::LOOP_NOT_IN_LOOP);
    }

    #[test]
    fn break_is_pending_until_commit() {
        let state = State::new();
        let ctx = Context::new(state.clone(), "s")
            .child("l")
            .with_enclosing_loop("l")
            .child("b");
        break_loop(&ctx).unwrap();
        assert_eq!(state.get(Scope::Comp, "l.__loop__.broken").unwrap(), None);

        state.commit().unwrap();
        assert_eq!(
            state.get(Scope::Comp, "l.__loop__.broken").unwrap(),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn false_condition_runs_no_round() {
        let mut group = LoopGroup::new();
        group
            .add_component(
                "body",
                Arc::new(NodeFn::new("body", |_, _| async { Ok(json!({"ran": true})) })),
                NodeSpec::default(),
            )
            .unwrap();
        group.start_comp("body").end_comp("body");
        let component = LoopComponent::new(group, FuncCondition::new(|| false))
            .unwrap()
            .with_callback(OutputCallback::new().with_output("results", json!("${l.body.ran}")));

        let state = State::new();
        let ctx = Context::new(state.clone(), "s").child("l");
        let out = component.invoke(json!({}), &ctx).await.unwrap();

        match out {
            Outcome::Complete(value) => assert_eq!(value, json!({"results": []})),
            Outcome::Interrupted(_) => panic!("loop should complete"),
        }
        assert_eq!(state.get(Scope::Io, "l.body").unwrap(), None);
        assert_eq!(state.get(Scope::Global, LOOP_ID).unwrap(), Some(Value::Null));
    }
}
