//! Property-based tests for trellis-core state.
//!
//! Covers:
//! 1. Deferred commit (nothing visible before commit, maps merge after)
//! 2. Rollback isolation across node ids
//! 3. Path round-trip with auto-vivification

use proptest::prelude::*;
use serde_json::{Value, json};

use trellis_core::state::path::{PathToken, render_path};
use trellis_core::state::{Scope, State};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Generate an arbitrary JSON value with bounded depth.
fn arb_json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9_ \\-]{0,30}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z_]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_scope() -> impl Strategy<Value = Scope> {
    prop_oneof![Just(Scope::Global), Just(Scope::Io), Just(Scope::Comp)]
}

/// A path matching the address grammar: a key, then keys or indices.
fn arb_path() -> impl Strategy<Value = Vec<PathToken>> {
    let token = prop_oneof![
        "[a-zA-Z0-9_]{1,6}".prop_map(PathToken::Key),
        (0usize..5).prop_map(PathToken::Index),
    ];
    (
        "[a-zA-Z][a-zA-Z0-9_]{0,5}",
        prop::collection::vec(token, 0..5),
    )
        .prop_map(|(head, rest)| {
            let mut tokens = vec![PathToken::Key(head)];
            tokens.extend(rest);
            tokens
        })
}

fn patch(path: &str, value: Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(path.to_string(), value);
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn deferred_commit_hides_then_reveals(
        scope in arb_scope(),
        k1 in "[a-z]{1,6}",
        k2 in "[a-z]{1,6}",
        v1 in arb_json_value(),
        v2 in arb_json_value(),
    ) {
        let state = State::new();
        let p1 = format!("first_{k1}");
        let p2 = format!("second_{k2}");

        state.update(scope, "n1", patch(&p1, v1.clone())).unwrap();
        state.update(scope, "n2", patch(&p2, v2.clone())).unwrap();
        prop_assert_eq!(state.get(scope, &p1).unwrap(), None);
        prop_assert_eq!(state.get(scope, &p2).unwrap(), None);

        state.commit().unwrap();
        prop_assert_eq!(state.get(scope, &p1).unwrap(), Some(v1));
        prop_assert_eq!(state.get(scope, &p2).unwrap(), Some(v2));
    }

    #[test]
    fn committed_maps_merge_rather_than_replace(
        existing in prop::collection::hash_map("[a-m]{1,4}", arb_json_value(), 1..4),
        incoming in prop::collection::hash_map("[n-z]{1,4}", arb_json_value(), 1..4),
    ) {
        let state = State::new();
        let existing: serde_json::Map<String, Value> = existing.into_iter().collect();
        let incoming: serde_json::Map<String, Value> = incoming.into_iter().collect();

        state.update(Scope::Io, "n1", patch("m", Value::Object(existing.clone()))).unwrap();
        state.commit().unwrap();
        state.update(Scope::Io, "n2", patch("m", Value::Object(incoming.clone()))).unwrap();
        prop_assert_eq!(
            state.get(Scope::Io, "m").unwrap(),
            Some(Value::Object(existing.clone()))
        );

        state.commit().unwrap();
        let merged = state.get(Scope::Io, "m").unwrap().unwrap();
        for (key, value) in existing.iter().chain(incoming.iter()) {
            prop_assert_eq!(&merged[key], value);
        }
    }

    #[test]
    fn rollback_isolation(
        scope in arb_scope(),
        kept in arb_json_value(),
        dropped in arb_json_value(),
    ) {
        let state = State::new();
        state.update(scope, "keep", patch("kept", kept.clone())).unwrap();
        state.update(scope, "drop", patch("dropped", dropped)).unwrap();
        state.update(scope, "drop", patch("kept_too", json!(1))).unwrap();

        state.rollback("drop");
        state.commit().unwrap();

        prop_assert_eq!(state.get(scope, "kept").unwrap(), Some(kept));
        prop_assert_eq!(state.get(scope, "dropped").unwrap(), None);
        prop_assert_eq!(state.get(scope, "kept_too").unwrap(), None);
    }

    #[test]
    fn path_roundtrip(tokens in arb_path(), value in arb_json_value()) {
        let state = State::new();
        let path = render_path(&tokens);

        state.update(Scope::Comp, "writer", patch(&path, value.clone())).unwrap();
        state.commit().unwrap();
        prop_assert_eq!(state.get(Scope::Comp, &path).unwrap(), Some(value.clone()));

        // Reference resolution reads io, not comp.
        prop_assert_eq!(state.resolve(&Value::String(format!("${{{path}}}"))).unwrap(), Value::Null);
    }

    #[test]
    fn deeper_writes_autovivify(tokens in arb_path(), extra in "[a-z]{1,4}", value in arb_json_value()) {
        let state = State::new();
        let base = render_path(&tokens);
        let deeper = format!("{base}.{extra}");

        state.update(Scope::Io, "w", patch(&base, json!(7))).unwrap();
        state.commit().unwrap();
        state.update(Scope::Io, "w", patch(&deeper, value.clone())).unwrap();
        state.commit().unwrap();

        prop_assert_eq!(state.get(Scope::Io, &deeper).unwrap(), Some(value.clone()));
        prop_assert_eq!(
            state.resolve(&Value::String(format!("${{{deeper}}}"))).unwrap(),
            value
        );
    }
}
