//! Workflow layer: register components, wire them, run them.
//!
//! A [`Workflow`](workflow::Workflow) wraps a graph with a start and an end
//! component, owns the checkpoint store used to suspend on user
//! interaction, and offers `invoke` and `stream` entry points.

pub mod components;
pub mod workflow;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::components::{
        BreakComponent, EndComponent, QuestionerComponent, SetVariableComponent, StartComponent,
    };
    pub use crate::workflow::{INPUT_NODE, Workflow, WorkflowInput, WorkflowOutput};
}
