pub mod component;
pub mod condition;
pub mod constants;
pub mod context;
pub mod edge;
pub mod executable;
pub mod graph;
pub mod loop_comp;
pub mod node;
pub mod schema;
pub mod subgraph;
pub mod vertex;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use trellis_checkpoint::prelude::{InteractiveInput, Interrupt, Outcome};

    pub use crate::component::{Ability, AbilitySet, ChunkStream, Component};
    pub use crate::condition::{
        AlwaysTrue, ArrayCondition, Condition, ExpressionCondition, FuncCondition,
        NumberCondition,
    };
    pub use crate::constants::{END, LOOP_ID, LOOP_INDEX, START};
    pub use crate::context::Context;
    pub use crate::edge::{ConditionalEdge, Edge};
    pub use crate::executable::ExecutableGraph;
    pub use crate::graph::Graph;
    pub use crate::loop_comp::{
        IntermediateLoopVarCallback, LoopCallback, LoopComponent, LoopGroup, OutputCallback,
        break_loop,
    };
    pub use crate::node::NodeFn;
    pub use crate::schema::{GraphConfig, NodeSpec};
    pub use crate::subgraph::SubGraphComponent;
    pub use crate::vertex::Vertex;
}
