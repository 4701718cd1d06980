use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_checkpoint::types::Outcome;
use trellis_core::error::{GraphError, Result};

use crate::context::Context;

/// A lazily produced sequence of chunks flowing along stream edges.
pub type ChunkStream = BoxStream<'static, Result<Value>>;

/// One way a component can be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    /// value in, value out
    Invoke,
    /// value in, chunks out
    Stream,
    /// chunks in, value out
    Collect,
    /// chunks in, chunks out
    Transform,
}

impl Ability {
    pub const ALL: [Ability; 4] = [
        Ability::Invoke,
        Ability::Stream,
        Ability::Collect,
        Ability::Transform,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::Stream => "stream",
            Self::Collect => "collect",
            Self::Transform => "transform",
        }
    }

    /// Whether this ability consumes a chunk stream.
    pub fn reads_stream(&self) -> bool {
        matches!(self, Self::Collect | Self::Transform)
    }

    /// Whether this ability produces a chunk stream.
    pub fn writes_stream(&self) -> bool {
        matches!(self, Self::Stream | Self::Transform)
    }

    fn bit(&self) -> u8 {
        match self {
            Self::Invoke => 1,
            Self::Stream => 1 << 1,
            Self::Collect => 1 << 2,
            Self::Transform => 1 << 3,
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ability::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim())
            .ok_or_else(|| format!("unknown ability '{s}'"))
    }
}

/// The set of abilities a node is declared with. Defaults to `{invoke}`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbilitySet(u8);

impl AbilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn of(abilities: &[Ability]) -> Self {
        abilities.iter().fold(Self::empty(), |set, a| set.with(*a))
    }

    pub fn with(self, ability: Ability) -> Self {
        Self(self.0 | ability.bit())
    }

    pub fn contains(&self, ability: Ability) -> bool {
        self.0 & ability.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Abilities in declaration order: invoke, stream, collect, transform.
    pub fn iter(&self) -> impl Iterator<Item = Ability> + '_ {
        Ability::ALL.into_iter().filter(|a| self.contains(*a))
    }

    pub fn reads_stream(&self) -> bool {
        self.iter().any(|a| a.reads_stream())
    }

    pub fn writes_stream(&self) -> bool {
        self.iter().any(|a| a.writes_stream())
    }
}

impl Default for AbilitySet {
    fn default() -> Self {
        Self::empty().with(Ability::Invoke)
    }
}

impl fmt::Debug for AbilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Ability> for AbilitySet {
    fn from_iter<I: IntoIterator<Item = Ability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, a| set.with(a))
    }
}

fn unsupported(ctx: &Context, ability: Ability) -> trellis_core::error::TrellisError {
    GraphError::UnsupportedAbility {
        node: ctx.executable_id().to_string(),
        ability: ability.to_string(),
    }
    .into()
}

/// A unit of work placed on a graph node.
///
/// Implementations override the abilities they support; every other ability
/// fails with `UnsupportedAbility`. Any call may return
/// [`Outcome::Interrupted`] to suspend the workflow until the user answers.
#[async_trait]
pub trait Component: Send + Sync {
    async fn invoke(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<Value>> {
        Err(unsupported(ctx, Ability::Invoke))
    }

    async fn stream(&self, _inputs: Value, ctx: &Context) -> Result<Outcome<ChunkStream>> {
        Err(unsupported(ctx, Ability::Stream))
    }

    async fn collect(&self, _inputs: ChunkStream, ctx: &Context) -> Result<Outcome<Value>> {
        Err(unsupported(ctx, Ability::Collect))
    }

    async fn transform(&self, _inputs: ChunkStream, ctx: &Context) -> Result<Outcome<ChunkStream>> {
        Err(unsupported(ctx, Ability::Transform))
    }
}
