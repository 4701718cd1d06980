use async_trait::async_trait;
use serde_json::{Value, json};

use trellis_core::error::{ConditionError, Result};
use trellis_core::state::Scope;

use super::{Condition, DEFAULT_MAX_ROUNDS};
use crate::context::Context;

pub(super) const CURSOR_KEY: &str = "index";
const LOOP_VAR_KEY: &str = "arrLoopVar";

pub(super) fn read_cursor(ctx: &Context) -> Result<usize> {
    Ok(ctx
        .node_state()
        .get_own(Scope::Io, CURSOR_KEY)?
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize)
}

pub(super) fn reset_cursor(ctx: &Context) -> Result<()> {
    ctx.node_state()
        .update_own_at(Scope::Io, CURSOR_KEY, json!(0))?;
    ctx.state().commit_scope(Scope::Io)
}

/// Iterates one or more parallel arrays in lockstep.
///
/// Each tick writes the current element of every array to
/// `<loop>.arrLoopVar.<key>` in io-state and advances the cursor at
/// `<loop>.index`. The loop stops once the cursor reaches the length of the
/// shortest array. Arrays are inline lists or whole-string `${path}`
/// references to lists.
#[derive(Debug, Clone)]
pub struct ArrayCondition {
    arrays: Vec<(String, Value)>,
    max_rounds: usize,
}

impl Default for ArrayCondition {
    fn default() -> Self {
        Self {
            arrays: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl ArrayCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_array(mut self, key: impl Into<String>, source: Value) -> Self {
        self.arrays.push((key.into(), source));
        self
    }

    /// Cap on the number of rounds, whatever the array lengths.
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    fn resolve(&self, ctx: &Context) -> Result<Vec<(&str, Vec<Value>)>> {
        self.arrays
            .iter()
            .map(|(key, source)| match ctx.state().resolve(source)? {
                Value::Array(items) => Ok((key.as_str(), items)),
                _ => Err(ConditionError::InvalidArray {
                    source_ref: source.to_string(),
                }
                .into()),
            })
            .collect()
    }
}

#[async_trait]
impl Condition for ArrayCondition {
    async fn init(&self, ctx: &Context) -> Result<()> {
        reset_cursor(ctx)
    }

    async fn evaluate(&self, ctx: &Context) -> Result<bool> {
        let cursor = read_cursor(ctx)?;
        let arrays = self.resolve(ctx)?;
        let bound = arrays
            .iter()
            .map(|(_, items)| items.len())
            .min()
            .unwrap_or(self.max_rounds)
            .min(self.max_rounds);

        if cursor >= bound {
            return Ok(false);
        }

        let node = ctx.node_state();
        for (key, items) in arrays {
            node.update_own_at(
                Scope::Io,
                &format!("{LOOP_VAR_KEY}.{key}"),
                items[cursor].clone(),
            )?;
        }
        node.update_own_at(Scope::Io, CURSOR_KEY, json!(cursor + 1))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::error::codes;
    use trellis_core::state::State;

    fn loop_ctx(state: &State) -> Context {
        Context::new(state.clone(), "s").child("l")
    }

    async fn tick(cond: &ArrayCondition, ctx: &Context) -> bool {
        let go = cond.evaluate(ctx).await.unwrap();
        ctx.state().commit().unwrap();
        go
    }

    #[tokio::test]
    async fn shortest_array_bounds_the_loop() {
        let state = State::new();
        let ctx = loop_ctx(&state);
        let cond = ArrayCondition::new()
            .with_array("x", json!([1, 2, 3]))
            .with_array("y", json!(["a", "b", "c", "d", "e"]));

        let mut trues = 0;
        while tick(&cond, &ctx).await {
            trues += 1;
            assert!(trues <= 3);
        }
        assert_eq!(trues, 3);
        assert_eq!(state.get(Scope::Io, "l.index").unwrap(), Some(json!(3)));
        assert_eq!(state.get(Scope::Io, "l.arrLoopVar").unwrap(), Some(json!({"x": 3, "y": "c"})));

        // exhausted stays exhausted
        assert!(!tick(&cond, &ctx).await);
        assert_eq!(state.get(Scope::Io, "l.index").unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn referenced_array() {
        let state = State::new();
        state.update_at(Scope::Io, "a", "a.array", json!([10, 20])).unwrap();
        state.commit().unwrap();
        let ctx = loop_ctx(&state);
        let cond = ArrayCondition::new().with_array("item", json!("${a.array}"));

        assert!(tick(&cond, &ctx).await);
        assert_eq!(state.get_ref("l.arrLoopVar.item").unwrap(), Some(json!(10)));
        assert!(tick(&cond, &ctx).await);
        assert_eq!(state.get_ref("l.arrLoopVar.item").unwrap(), Some(json!(20)));
        assert!(!tick(&cond, &ctx).await);
    }

    #[tokio::test]
    async fn init_resets_the_cursor() {
        let state = State::new();
        let ctx = loop_ctx(&state);
        let cond = ArrayCondition::new().with_array("x", json!([1]));

        assert!(tick(&cond, &ctx).await);
        assert!(!tick(&cond, &ctx).await);
        cond.init(&ctx).await.unwrap();
        assert!(tick(&cond, &ctx).await);
    }

    #[tokio::test]
    async fn no_arrays_uses_round_cap() {
        let state = State::new();
        let ctx = loop_ctx(&state);
        let cond = ArrayCondition::new().with_max_rounds(2);

        assert!(tick(&cond, &ctx).await);
        assert!(tick(&cond, &ctx).await);
        assert!(!tick(&cond, &ctx).await);
    }

    #[tokio::test]
    async fn non_list_source_is_rejected() {
        let state = State::new();
        let ctx = loop_ctx(&state);
        let cond = ArrayCondition::new().with_array("x", json!("${missing}"));
        let err = cond.evaluate(&ctx).await.unwrap_err();
        assert_eq!(err.code(), codes::CONDITION_INVALID_ARRAY);
    }
}
