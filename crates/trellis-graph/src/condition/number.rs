use async_trait::async_trait;
use serde_json::{Value, json};

use trellis_core::error::{ConditionError, Result};
use trellis_core::state::Scope;

use super::array::{CURSOR_KEY, read_cursor, reset_cursor};
use super::{Condition, DEFAULT_MAX_ROUNDS};
use crate::context::Context;

/// Repeats the loop body a fixed number of times.
///
/// The count is a literal number or a whole-string `${path}` reference,
/// resolved on every tick. The cursor lives at `<loop>.index` in io-state.
#[derive(Debug, Clone)]
pub struct NumberCondition {
    limit: Value,
    max_rounds: usize,
}

impl NumberCondition {
    pub fn new(limit: Value) -> Self {
        Self {
            limit,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    fn bound(&self, ctx: &Context) -> Result<usize> {
        let resolved = ctx.state().resolve(&self.limit)?;
        let count = resolved.as_u64().ok_or_else(|| ConditionError::Evaluation {
            expression: self.limit.to_string(),
            detail: format!("expected a non-negative integer, got {resolved}"),
        })?;
        Ok((count as usize).min(self.max_rounds))
    }
}

#[async_trait]
impl Condition for NumberCondition {
    async fn init(&self, ctx: &Context) -> Result<()> {
        reset_cursor(ctx)
    }

    async fn evaluate(&self, ctx: &Context) -> Result<bool> {
        let cursor = read_cursor(ctx)?;
        if cursor >= self.bound(ctx)? {
            return Ok(false);
        }
        ctx.node_state()
            .update_own_at(Scope::Io, CURSOR_KEY, json!(cursor + 1))?;
        Ok(true)
    }
}
