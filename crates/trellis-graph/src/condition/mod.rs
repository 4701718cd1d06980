//! Boolean predicates that drive loops.

mod array;
mod expression;
mod number;

use std::sync::Arc;

use async_trait::async_trait;

use trellis_core::error::Result;

use crate::context::Context;

pub use array::ArrayCondition;
pub use expression::ExpressionCondition;
pub use number::NumberCondition;

/// Iteration cap applied when a condition has no natural bound.
pub const DEFAULT_MAX_ROUNDS: usize = 1000;

/// A predicate evaluated once per loop tick, in the loop's context.
///
/// Conditions that keep a cursor store it in state under the loop's
/// executable id, so it survives checkpoint and resume. `init` resets that
/// cursor and runs on loop entry and exit.
#[async_trait]
pub trait Condition: Send + Sync {
    async fn init(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, ctx: &Context) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrue;

#[async_trait]
impl Condition for AlwaysTrue {
    async fn evaluate(&self, _ctx: &Context) -> Result<bool> {
        Ok(true)
    }
}

/// Wraps an arbitrary zero-argument predicate.
#[derive(Clone)]
pub struct FuncCondition {
    func: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl FuncCondition {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for FuncCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuncCondition").finish_non_exhaustive()
    }
}

#[async_trait]
impl Condition for FuncCondition {
    async fn evaluate(&self, _ctx: &Context) -> Result<bool> {
        Ok((self.func)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_core::state::State;

    #[tokio::test]
    async fn always_true() {
        let ctx = Context::new(State::new(), "s");
        assert!(AlwaysTrue.evaluate(&ctx).await.unwrap());
        AlwaysTrue.init(&ctx).await.unwrap();
    }

    #[tokio::test]
    async fn func_condition_calls_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cond = FuncCondition::new(move || counter.fetch_add(1, Ordering::SeqCst) < 2);
        let ctx = Context::new(State::new(), "s");

        assert!(cond.evaluate(&ctx).await.unwrap());
        assert!(cond.evaluate(&ctx).await.unwrap());
        assert!(!cond.evaluate(&ctx).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
