//! Reference components every workflow can use.

use async_trait::async_trait;
use serde_json::{Value, json};

use trellis_checkpoint::types::Outcome;
use trellis_core::error::{Result, StateError};
use trellis_core::state::{Scope, as_reference, parse_path};
use trellis_graph::component::Component;
use trellis_graph::context::Context;
use trellis_graph::loop_comp::break_loop;

/// Entry node: completes with its resolved inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartComponent;

#[async_trait]
impl Component for StartComponent {
    async fn invoke(&self, inputs: Value, _ctx: &Context) -> Result<Outcome<Value>> {
        Ok(Outcome::Complete(inputs))
    }
}

/// Exit node: completes with its resolved inputs, which become the
/// workflow's output.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndComponent;

#[async_trait]
impl Component for EndComponent {
    async fn invoke(&self, inputs: Value, _ctx: &Context) -> Result<Outcome<Value>> {
        Ok(Outcome::Complete(inputs))
    }
}

/// Assigns values to io-state paths.
///
/// Targets must be whole `${path}` references; values are resolved against
/// state first, so a value may itself be a reference. Writes become visible
/// when the node commits.
#[derive(Debug, Clone, Default)]
pub struct SetVariableComponent {
    assignments: Vec<(String, Value)>,
}

impl SetVariableComponent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, target: &str, value: Value) -> Result<Self> {
        let path = as_reference(target).ok_or_else(|| {
            StateError::invalid_path(target, "assignment target must be a `${path}` reference")
        })?;
        parse_path(path)?;
        self.assignments.push((path.to_string(), value));
        Ok(self)
    }
}

#[async_trait]
impl Component for SetVariableComponent {
    async fn invoke(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        let node = ctx.node_state();
        for (path, value) in &self.assignments {
            let resolved = ctx.state().resolve(value)?;
            node.update_at(Scope::Io, path, resolved)?;
        }
        Ok(Outcome::Complete(json!({})))
    }
}

/// Asks the user a question and completes with `{"answer": ...}`.
///
/// The prompt is resolved against state, so it may reference earlier
/// outputs. Without a queued answer the workflow suspends.
#[derive(Debug, Clone)]
pub struct QuestionerComponent {
    prompt: Value,
}

impl QuestionerComponent {
    pub fn new(prompt: impl Into<Value>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

#[async_trait]
impl Component for QuestionerComponent {
    async fn invoke(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        let prompt = ctx.state().resolve(&self.prompt)?;
        Ok(ctx.interact(prompt)?.map(|answer| json!({"answer": answer})))
    }
}

/// Stops the enclosing loop after the current round.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakComponent;

#[async_trait]
impl Component for BreakComponent {
    async fn invoke(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        break_loop(ctx)?;
        Ok(Outcome::Complete(json!({})))
    }
}
