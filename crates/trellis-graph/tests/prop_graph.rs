//! Property-based tests for graph execution.
//!
//! Covers:
//! 1. Linear chains carry a value through every node exactly once
//! 2. Fan-in barriers fire once for any number of branches
//! 3. Array loops accumulate one result per element

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use proptest::prelude::*;
use serde_json::{Value, json};

use trellis_core::state::{Scope, State};
use trellis_graph::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn counted_echo(runs: Arc<AtomicUsize>) -> Arc<dyn Component> {
    Arc::new(NodeFn::new("echo", move |inputs, _ctx| {
        let runs = runs.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(inputs)
        }
    }))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn linear_chain_passes_value_through(len in 1usize..8, seed in any::<i64>()) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        for i in 0..len {
            let input = if i == 0 {
                json!({"v": seed})
            } else {
                json!({"v": format!("${{n{}.v}}", i - 1)})
            };
            graph
                .add_node(format!("n{i}"), counted_echo(runs.clone()), NodeSpec::default().with_inputs(input))
                .unwrap();
            if i > 0 {
                graph.add_edge(format!("n{}", i - 1), format!("n{i}"));
            }
        }
        graph.set_entry_point("n0").set_finish_point(format!("n{}", len - 1));

        let state = State::new();
        runtime()
            .block_on(graph.compile().unwrap().invoke(&Context::new(state.clone(), "p")))
            .unwrap();

        prop_assert_eq!(runs.load(Ordering::SeqCst), len);
        prop_assert_eq!(
            state.get(Scope::Io, &format!("n{}.v", len - 1)).unwrap(),
            Some(json!(seed))
        );
    }

    #[test]
    fn fan_in_fires_once(branches in 1usize..6) {
        let joins = Arc::new(AtomicUsize::new(0));
        let mut graph = Graph::new();
        graph.add_node("root", counted_echo(Arc::default()), NodeSpec::default()).unwrap();
        graph
            .add_node("join", counted_echo(joins.clone()), NodeSpec::default().wait_for_all())
            .unwrap();
        for b in 0..branches {
            let name = format!("b{b}");
            graph.add_node(name.as_str(), counted_echo(Arc::default()), NodeSpec::default()).unwrap();
            graph.add_edge("root", name.as_str());
            graph.add_edge(name.as_str(), "join");
        }
        graph.set_entry_point("root").set_finish_point("join");

        runtime()
            .block_on(graph.compile().unwrap().invoke(&Context::new(State::new(), "p")))
            .unwrap();
        prop_assert_eq!(joins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn array_loop_collects_every_element(items in prop::collection::vec(any::<i32>(), 0..10)) {
        let mut group = LoopGroup::new();
        group
            .add_component(
                "id",
                Arc::new(NodeFn::new("id", |inputs, _| async move { Ok(inputs) })),
                NodeSpec::default().with_inputs(json!({"x": "${l.arrLoopVar.x}"})),
            )
            .unwrap();
        group.start_comp("id").end_comp("id");
        let component = LoopComponent::new(
            group,
            ArrayCondition::new().with_array("x", json!(items.clone())),
        )
        .unwrap()
        .with_callback(OutputCallback::new().with_output("xs", json!("${l.id.x}")));

        let mut graph = Graph::new();
        graph.add_node("l", Arc::new(component), NodeSpec::default()).unwrap();
        graph.set_entry_point("l").set_finish_point("l");

        let state = State::new();
        runtime()
            .block_on(graph.compile().unwrap().invoke(&Context::new(state.clone(), "p")))
            .unwrap();

        let expected: Vec<Value> = items.iter().map(|i| json!(i)).collect();
        prop_assert_eq!(state.get(Scope::Io, "l.xs").unwrap(), Some(Value::Array(expected)));
    }
}
