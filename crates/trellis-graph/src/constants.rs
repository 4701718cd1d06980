/// Sentinel node name representing the graph entry point.
pub const START: &str = "__start__";

/// Sentinel node name representing the graph exit point.
pub const END: &str = "__end__";

/// Global-state key naming the innermost running loop.
pub const LOOP_ID: &str = "__loop_id__";

/// Global-state key holding the 1-based round of the innermost running loop.
pub const LOOP_INDEX: &str = "__loop_index__";
