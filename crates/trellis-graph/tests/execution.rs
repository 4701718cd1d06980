use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use trellis_checkpoint::prelude::{CheckpointStore, MemoryCheckpointStore};
use trellis_core::config::RunConfig;
use trellis_core::error::codes;
use trellis_core::state::{Scope, State};
use trellis_graph::prelude::*;

fn constant(name: &str, output: Value) -> Arc<dyn Component> {
    Arc::new(NodeFn::new(name, move |_inputs, _ctx| {
        let output = output.clone();
        async move { Ok(output) }
    }))
}

fn echo(name: &str) -> Arc<dyn Component> {
    Arc::new(NodeFn::new(name, |inputs, _ctx| async move { Ok(inputs) }))
}

/// Linear execution: a -> b -> c, each reading its predecessor.
#[tokio::test]
async fn execute_linear_graph() {
    let mut graph = Graph::new();
    graph
        .add_node("a", constant("a", json!({"step": "a", "n": 1})), NodeSpec::default())
        .unwrap();
    graph
        .add_node(
            "b",
            echo("b"),
            NodeSpec::default().with_inputs(json!({"prev": "${a.step}", "n": "${a.n}"})),
        )
        .unwrap();
    graph
        .add_node(
            "c",
            echo("c"),
            NodeSpec::default().with_inputs(json!({"chain": ["${b.prev}", "c"]})),
        )
        .unwrap();
    graph.set_entry_point("a");
    graph.add_edge("a", "b");
    graph.add_edge("b", "c");
    graph.set_finish_point("c");

    let compiled = graph.compile().unwrap();
    let state = State::new();
    let outcome = compiled.invoke(&Context::new(state.clone(), "s")).await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(state.get(Scope::Io, "b").unwrap(), Some(json!({"prev": "a", "n": 1})));
    assert_eq!(state.get(Scope::Io, "c.chain").unwrap(), Some(json!(["a", "c"])));
}

/// Conditional routing picks a branch from committed state.
#[tokio::test]
async fn execute_conditional_routing() {
    let mut graph = Graph::new();
    graph
        .add_node("classify", constant("classify", json!({"kind": "small"})), NodeSpec::default())
        .unwrap();
    graph
        .add_node("small", constant("small", json!({"handled": "small"})), NodeSpec::default())
        .unwrap();
    graph
        .add_node("large", constant("large", json!({"handled": "large"})), NodeSpec::default())
        .unwrap();
    graph.set_entry_point("classify");
    graph.add_conditional_edges(ConditionalEdge::new(
        "classify",
        |ctx: &Context| {
            let kind = ctx.state().get(Scope::Io, "classify.kind")?;
            Ok(kind.and_then(|v| v.as_str().map(String::from)).unwrap_or_default())
        },
        Some(HashMap::from([
            ("small".to_string(), "small".to_string()),
            ("large".to_string(), "large".to_string()),
        ])),
    ));
    graph.set_finish_point("small");
    graph.set_finish_point("large");

    let state = State::new();
    graph
        .compile()
        .unwrap()
        .invoke(&Context::new(state.clone(), "s"))
        .await
        .unwrap();

    assert_eq!(state.get(Scope::Io, "small.handled").unwrap(), Some(json!("small")));
    assert_eq!(state.get(Scope::Io, "large").unwrap(), None);
}

/// A router choosing END stops the branch.
#[tokio::test]
async fn router_can_finish_early() {
    let mut graph = Graph::new();
    graph.add_node("a", constant("a", json!({})), NodeSpec::default()).unwrap();
    graph.add_node("b", constant("b", json!({"ran": true})), NodeSpec::default()).unwrap();
    graph.set_entry_point("a");
    graph.add_conditional_edges(ConditionalEdge::new(
        "a",
        |_: &Context| Ok(END.to_string()),
        None,
    ));
    graph.set_finish_point("b");

    let state = State::new();
    graph
        .compile()
        .unwrap()
        .invoke(&Context::new(state.clone(), "s"))
        .await
        .unwrap();
    assert_eq!(state.get(Scope::Io, "b").unwrap(), None);
}

/// A fan-in node waiting for all predecessors runs exactly once, after both
/// branches, and sees both outputs.
#[tokio::test]
async fn fan_in_waits_for_all_branches() {
    let joins = Arc::new(AtomicUsize::new(0));
    let join_count = joins.clone();

    let mut graph = Graph::new();
    graph.add_node("start", constant("start", json!({})), NodeSpec::default()).unwrap();
    graph.add_node("left", constant("left", json!({"v": 1})), NodeSpec::default()).unwrap();
    graph.add_node("mid", constant("mid", json!({})), NodeSpec::default()).unwrap();
    graph.add_node("right", constant("right", json!({"v": 2})), NodeSpec::default()).unwrap();
    graph
        .add_node(
            "join",
            Arc::new(NodeFn::new("join", move |inputs, _ctx| {
                let join_count = join_count.clone();
                async move {
                    join_count.fetch_add(1, Ordering::SeqCst);
                    Ok(inputs)
                }
            })),
            NodeSpec::default()
                .with_inputs(json!({"l": "${left.v}", "r": "${right.v}"}))
                .wait_for_all(),
        )
        .unwrap();
    graph.set_entry_point("start");
    graph.add_edge("start", "left");
    graph.add_edge("start", "mid");
    graph.add_edge("mid", "right");
    graph.add_edge("left", "join");
    graph.add_edge("right", "join");
    graph.set_finish_point("join");

    let state = State::new();
    let compiled = graph.compile().unwrap();
    assert_eq!(compiled.barrier_of("join").map(|p| p.len()), Some(2));
    compiled.invoke(&Context::new(state.clone(), "s")).await.unwrap();

    assert_eq!(joins.load(Ordering::SeqCst), 1);
    assert_eq!(state.get(Scope::Io, "join").unwrap(), Some(json!({"l": 1, "r": 2})));
}

/// A cycle without an exit hits the recursion limit.
#[tokio::test]
async fn recursion_limit_stops_cycles() {
    let mut graph = Graph::new();
    graph.add_node("a", constant("a", json!({})), NodeSpec::default()).unwrap();
    graph.add_node("b", constant("b", json!({})), NodeSpec::default()).unwrap();
    graph.set_entry_point("a");
    graph.add_edge("a", "b");
    graph.add_edge("b", "a");

    let ctx = Context::new(State::new(), "s").with_run_config(RunConfig::new().with_recursion_limit(5));
    let err = graph.compile().unwrap().invoke(&ctx).await.unwrap_err();
    assert_eq!(err.code(), codes::GRAPH_RECURSION_LIMIT);
}

/// Node failures are wrapped with the node id and ability, keeping the
/// original code.
#[tokio::test]
async fn node_failure_is_wrapped() {
    let mut graph = Graph::new();
    graph
        .add_node(
            "boom",
            Arc::new(NodeFn::new("boom", |_inputs, _ctx| async {
                Err(trellis_core::error::ComponentError::new(42, "exploded").into())
            })),
            NodeSpec::default(),
        )
        .unwrap();
    graph.set_entry_point("boom").set_finish_point("boom");

    let err = graph
        .compile()
        .unwrap()
        .invoke(&Context::new(State::new(), "s"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 42);
    let message = err.to_string();
    assert!(message.contains("boom"), "{message}");
    assert!(message.contains("invoke"), "{message}");
}

/// Writes queued by a failing node are discarded, never committed later.
#[tokio::test]
async fn failed_node_writes_are_rolled_back() {
    let mut graph = Graph::new();
    graph
        .add_node(
            "bad",
            Arc::new(NodeFn::new("bad", |_inputs, ctx: Context| async move {
                ctx.node_state()
                    .update_at(Scope::Io, "speculative", json!(true))?;
                ctx.node_state()
                    .update_own_at(Scope::Comp, "scratch", json!(1))?;
                Err(trellis_core::error::ComponentError::new(7, "boom").into())
            })),
            NodeSpec::default(),
        )
        .unwrap();
    graph.set_entry_point("bad").set_finish_point("bad");

    let state = State::new();
    let err = graph
        .compile()
        .unwrap()
        .invoke(&Context::new(state.clone(), "s"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 7);
    assert!(state.pending().is_empty());

    state.commit().unwrap();
    assert_eq!(state.get(Scope::Io, "speculative").unwrap(), None);
    assert_eq!(state.get(Scope::Comp, "bad.scratch").unwrap(), None);
}

/// A completed run leaves no checkpoints behind.
#[tokio::test]
async fn completed_run_clears_checkpoints() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let mut graph = Graph::new();
    graph.add_node("a", constant("a", json!({})), NodeSpec::default()).unwrap();
    graph.add_node("b", constant("b", json!({})), NodeSpec::default()).unwrap();
    graph.set_entry_point("a");
    graph.add_edge("a", "b");
    graph.set_finish_point("b");

    let ctx = Context::new(State::new(), "session-1").with_checkpointer(store.clone());
    graph.compile().unwrap().invoke(&ctx).await.unwrap();
    assert!(!store.has_thread("session-1").await.unwrap());
}

/// Compile-time validation rejects structural mistakes.
#[test]
fn compile_rejects_invalid_graphs() {
    let mut missing_entry = Graph::new();
    missing_entry.add_node("a", echo("a"), NodeSpec::default()).unwrap();
    assert_eq!(missing_entry.compile().unwrap_err().code(), codes::GRAPH_INVALID);

    let mut unreachable = Graph::new();
    unreachable.add_node("a", echo("a"), NodeSpec::default()).unwrap();
    unreachable.add_node("island", echo("island"), NodeSpec::default()).unwrap();
    unreachable.set_entry_point("a");
    let err = unreachable.compile().unwrap_err();
    assert!(err.to_string().contains("island"));

    let mut dangling = Graph::new();
    dangling.add_node("a", echo("a"), NodeSpec::default()).unwrap();
    dangling.set_entry_point("a");
    dangling.add_edge("a", "ghost");
    assert!(dangling.compile().unwrap_err().to_string().contains("ghost"));

    let mut reserved = Graph::new();
    assert!(reserved.add_node(START, echo("s"), NodeSpec::default()).is_err());
    assert!(reserved.add_node("a.b", echo("ab"), NodeSpec::default()).is_err());
}
