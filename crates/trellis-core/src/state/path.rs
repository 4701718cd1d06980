//! Path grammar for addressing nested JSON trees: `a.b[2].c`.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::StateError;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{k}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Parse `segment ('.' segment | '[' digits ']')*`.
pub fn parse_path(path: &str) -> Result<Vec<PathToken>, StateError> {
    if path.is_empty() {
        return Err(StateError::invalid_path(path, "empty path"));
    }
    let mut tokens = Vec::new();
    for part in path.split('.') {
        parse_part(path, part, &mut tokens)?;
    }
    Ok(tokens)
}

fn parse_part(path: &str, part: &str, tokens: &mut Vec<PathToken>) -> Result<(), StateError> {
    let (name, mut rest) = match part.find('[') {
        Some(i) => part.split_at(i),
        None => (part, ""),
    };
    if name.is_empty() {
        return Err(StateError::invalid_path(path, "empty segment"));
    }
    if name.contains(']') {
        return Err(StateError::invalid_path(path, "unexpected ']'"));
    }
    tokens.push(PathToken::Key(name.to_string()));

    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(StateError::invalid_path(path, "expected '[' after index"));
        }
        let end = rest
            .find(']')
            .ok_or_else(|| StateError::invalid_path(path, "unclosed '['"))?;
        let digits = &rest[1..end];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StateError::invalid_path(
                path,
                format!("'{digits}' is not an index"),
            ));
        }
        let index = digits
            .parse::<usize>()
            .map_err(|e| StateError::invalid_path(path, e.to_string()))?;
        tokens.push(PathToken::Index(index));
        rest = &rest[end + 1..];
    }
    Ok(())
}

/// Render tokens back into path syntax.
pub fn render_path(tokens: &[PathToken]) -> String {
    let mut out = String::new();
    for token in tokens {
        if let PathToken::Key(_) = token {
            if !out.is_empty() {
                out.push('.');
            }
        }
        out.push_str(&token.to_string());
    }
    out
}

/// If `s` is a whole-string `${path}` reference, return the inner path.
pub fn as_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    let inner = inner.trim();
    if inner.is_empty() { None } else { Some(inner) }
}

/// Join a namespace prefix and a relative path.
pub fn join(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (_, true) => prefix.to_string(),
        _ if path.starts_with('[') => format!("{prefix}{path}"),
        _ => format!("{prefix}.{path}"),
    }
}

/// Walk `tokens` from `root`; `None` on any miss.
pub fn lookup<'a>(root: &'a Value, tokens: &[PathToken]) -> Option<&'a Value> {
    tokens.iter().try_fold(root, |current, token| match token {
        PathToken::Key(key) => current.as_object()?.get(key),
        PathToken::Index(index) => current.as_array()?.get(*index),
    })
}

/// Walk `tokens` from `root`, creating whatever container each step needs.
/// Non-container intermediates are replaced; arrays are padded with `null`.
pub fn slot_mut<'a>(root: &'a mut Value, tokens: &[PathToken]) -> &'a mut Value {
    let mut current = root;
    for token in tokens {
        current = match token {
            PathToken::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                match current {
                    Value::Object(map) => map.entry(key.clone()).or_insert(Value::Null),
                    _ => unreachable!("slot was just made an object"),
                }
            }
            PathToken::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                match current {
                    Value::Array(items) => {
                        if items.len() <= *index {
                            items.resize(*index + 1, Value::Null);
                        }
                        &mut items[*index]
                    }
                    _ => unreachable!("slot was just made an array"),
                }
            }
        };
    }
    current
}

/// Merge `incoming` into `target`: maps merge key by key, anything else
/// replaces.
pub fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Remove the value at `tokens`. Returns the removed value, if any.
/// Array elements are nulled rather than shifted.
pub fn remove(root: &mut Value, tokens: &[PathToken]) -> Option<Value> {
    let (last, parents) = tokens.split_last()?;
    let mut current = root;
    for token in parents {
        current = match token {
            PathToken::Key(key) => current.as_object_mut()?.get_mut(key)?,
            PathToken::Index(index) => current.as_array_mut()?.get_mut(*index)?,
        };
    }
    match last {
        PathToken::Key(key) => current.as_object_mut()?.remove(key),
        PathToken::Index(index) => current
            .as_array_mut()?
            .get_mut(*index)
            .map(std::mem::take),
    }
}

/// Short description of a value's JSON type, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: &str) -> PathToken {
        PathToken::Key(k.into())
    }

    #[test]
    fn parse_simple_and_nested() {
        assert_eq!(parse_path("a").unwrap(), vec![key("a")]);
        assert_eq!(
            parse_path("a.b[2].c").unwrap(),
            vec![key("a"), key("b"), PathToken::Index(2), key("c")]
        );
        assert_eq!(
            parse_path("m[0][1]").unwrap(),
            vec![key("m"), PathToken::Index(0), PathToken::Index(1)]
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in ["", "a..b", ".a", "a.", "a[", "a[x]", "a[]", "a]b", "a[1]b", "[0]"] {
            assert!(parse_path(bad).is_err(), "expected '{bad}' to be rejected");
        }
    }

    #[test]
    fn render_inverts_parse() {
        for path in ["a", "a.b", "a.b[2].c", "x[0][3]"] {
            assert_eq!(render_path(&parse_path(path).unwrap()), path);
        }
    }

    #[test]
    fn reference_detection_is_whole_string() {
        assert_eq!(as_reference("${a.b}"), Some("a.b"));
        assert_eq!(as_reference("${ a }"), Some("a"));
        assert_eq!(as_reference("a.b"), None);
        assert_eq!(as_reference("x ${a}"), None);
        assert_eq!(as_reference("${}"), None);
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("n", ""), "n");
        assert_eq!(join("n", "a.b"), "n.a.b");
        assert_eq!(join("n", "[1]"), "n[1]");
    }

    #[test]
    fn lookup_misses_are_none() {
        let tree = json!({"a": {"b": [1, {"c": 2}]}});
        assert_eq!(lookup(&tree, &parse_path("a.b[1].c").unwrap()), Some(&json!(2)));
        assert_eq!(lookup(&tree, &parse_path("a.b[5]").unwrap()), None);
        assert_eq!(lookup(&tree, &parse_path("a.x.y").unwrap()), None);
        assert_eq!(lookup(&tree, &parse_path("a.b.c").unwrap()), None);
    }

    #[test]
    fn slot_mut_autovivifies() {
        let mut tree = json!({});
        *slot_mut(&mut tree, &parse_path("a.b[2].c").unwrap()) = json!(true);
        assert_eq!(tree, json!({"a": {"b": [null, null, {"c": true}]}}));
    }

    #[test]
    fn slot_mut_replaces_scalar_intermediates() {
        let mut tree = json!({"a": 5});
        *slot_mut(&mut tree, &parse_path("a.b").unwrap()) = json!(1);
        assert_eq!(tree, json!({"a": {"b": 1}}));
    }

    #[test]
    fn deep_merge_merges_maps_and_replaces_others() {
        let mut tree = json!({"m": {"x": 1, "y": {"z": 1}}, "l": [1, 2]});
        deep_merge(&mut tree, json!({"m": {"y": {"w": 2}}, "l": [3]}));
        assert_eq!(tree, json!({"m": {"x": 1, "y": {"z": 1, "w": 2}}, "l": [3]}));
    }

    #[test]
    fn remove_key_and_index() {
        let mut tree = json!({"a": {"b": 1, "c": [1, 2]}});
        assert_eq!(remove(&mut tree, &parse_path("a.b").unwrap()), Some(json!(1)));
        assert_eq!(remove(&mut tree, &parse_path("a.c[0]").unwrap()), Some(json!(1)));
        assert_eq!(remove(&mut tree, &parse_path("a.zz").unwrap()), None);
        assert_eq!(tree, json!({"a": {"c": [null, 2]}}));
    }
}
