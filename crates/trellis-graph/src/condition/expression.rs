use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::Value;

use trellis_core::error::{ConditionError, Result};
use trellis_core::state::parse_path;
use trellis_core::store::Store;

use super::Condition;
use crate::context::Context;

const REF_PREFIX: &str = "trellis_ref_";

/// A boolean expression over `${path}` placeholders.
///
/// Placeholders are looked up in the durable store first and in committed
/// state otherwise, once per evaluation. Besides the sandbox's own operators
/// the expression may use `and`, `or`, `not`, `x not_in xs`, and the
/// functions `length`, `is_empty` and `is_not_empty`. Single-quoted strings
/// are accepted.
#[derive(Debug, Clone)]
pub struct ExpressionCondition {
    expression: String,
    script: String,
    paths: Vec<String>,
}

impl ExpressionCondition {
    /// Parse `expression`, failing on malformed placeholders or syntax.
    pub fn new(expression: impl Into<String>) -> Result<Self> {
        let expression = expression.into();
        let parse_error = |detail: String| ConditionError::Parse {
            expression: expression.clone(),
            detail,
        };

        let placeholder =
            Regex::new(r"\$\{([^}]*)\}").map_err(|e| parse_error(e.to_string()))?;
        let mut paths: Vec<String> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for caps in placeholder.captures_iter(&expression) {
            let path = caps[1].trim().to_string();
            parse_path(&path).map_err(|e| parse_error(e.to_string()))?;
            if !slots.contains_key(&path) {
                slots.insert(path.clone(), paths.len());
                paths.push(path);
            }
        }
        let substituted = placeholder.replace_all(&expression, |caps: &regex::Captures<'_>| {
            format!("{REF_PREFIX}{}", slots[caps[1].trim()])
        });

        let rules = keyword_rules().map_err(|e| parse_error(e.to_string()))?;
        let script = rewrite(&substituted, &rules);

        sandbox()
            .map_err(parse_error)?
            .compile(&script)
            .map_err(|e| parse_error(e.to_string()))?;

        Ok(Self {
            expression,
            script,
            paths,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn evaluate_with(&self, values: Vec<Value>) -> Result<bool> {
        let eval_error = |detail: String| ConditionError::Evaluation {
            expression: self.expression.clone(),
            detail,
        };

        let engine = sandbox().map_err(eval_error)?;
        let mut scope = Scope::new();
        for (index, value) in values.iter().enumerate() {
            let dynamic = rhai::serde::to_dynamic(value).map_err(|e| eval_error(e.to_string()))?;
            scope.push_dynamic(format!("{REF_PREFIX}{index}"), dynamic);
        }

        let result: bool = engine
            .eval_with_scope(&mut scope, &self.script)
            .map_err(|e| eval_error(e.to_string()))?;
        Ok(result)
    }
}

#[async_trait]
impl Condition for ExpressionCondition {
    async fn evaluate(&self, ctx: &Context) -> Result<bool> {
        let mut values = Vec::with_capacity(self.paths.len());
        for path in &self.paths {
            let value = match ctx.store().read(path).await? {
                Some(value) => value,
                None => ctx.state().get_ref(path)?.unwrap_or(Value::Null),
            };
            values.push(value);
        }
        // The engine is not Send; it lives only inside this call.
        self.evaluate_with(values)
    }
}

fn keyword_rules() -> std::result::Result<Vec<(Regex, &'static str)>, regex::Error> {
    Ok(vec![
        (Regex::new(r"\band\b")?, "&&"),
        (Regex::new(r"\bor\b")?, "||"),
        (Regex::new(r"\bnot\b")?, "!"),
        (Regex::new(r"\bTrue\b")?, "true"),
        (Regex::new(r"\bFalse\b")?, "false"),
    ])
}

/// Apply keyword rules outside string literals and normalise single-quoted
/// literals to double quotes.
fn rewrite(expression: &str, rules: &[(Regex, &'static str)]) -> String {
    let apply = |plain: &str| {
        rules
            .iter()
            .fold(plain.to_string(), |acc, (re, with)| re.replace_all(&acc, *with).into_owned())
    };

    let mut out = String::with_capacity(expression.len());
    let mut plain = String::new();
    let mut chars = expression.chars();
    while let Some(c) = chars.next() {
        if c != '"' && c != '\'' {
            plain.push(c);
            continue;
        }
        out.push_str(&apply(&plain));
        plain.clear();

        let mut literal = String::new();
        let mut closed = false;
        while let Some(n) = chars.next() {
            if n == '\\' {
                literal.push(n);
                if let Some(escaped) = chars.next() {
                    literal.push(escaped);
                }
                continue;
            }
            if n == c {
                closed = true;
                break;
            }
            if n == '"' {
                literal.push('\\');
            }
            literal.push(n);
        }
        out.push('"');
        out.push_str(&literal);
        if closed {
            out.push('"');
        }
    }
    out.push_str(&apply(&plain));
    out
}

fn to_json(value: &Dynamic) -> std::result::Result<Value, Box<EvalAltResult>> {
    rhai::serde::from_dynamic(value)
}

fn length(value: Dynamic) -> std::result::Result<i64, Box<EvalAltResult>> {
    match to_json(&value)? {
        Value::Null => Ok(0),
        Value::String(s) => Ok(s.chars().count() as i64),
        Value::Array(items) => Ok(items.len() as i64),
        Value::Object(map) => Ok(map.len() as i64),
        other => Err(format!("length() of a non-container value: {other}").into()),
    }
}

fn not_in(item: Dynamic, container: Dynamic) -> std::result::Result<bool, Box<EvalAltResult>> {
    let item = to_json(&item)?;
    match (to_json(&container)?, &item) {
        (Value::Array(items), _) => Ok(!items.contains(&item)),
        (Value::String(haystack), Value::String(needle)) => Ok(!haystack.contains(needle.as_str())),
        (Value::Object(map), Value::String(key)) => Ok(!map.contains_key(key)),
        (Value::Null, _) => Ok(true),
        (other, _) => Err(format!("not_in over a non-container value: {other}").into()),
    }
}

/// A sandboxed engine with the extra operators and functions registered.
fn sandbox() -> std::result::Result<Engine, String> {
    let mut engine = Engine::new();
    engine.set_max_operations(10_000);
    engine.set_max_call_levels(8);
    engine.set_max_expr_depths(32, 16);
    engine.set_max_string_size(4096);
    engine.set_max_array_size(256);
    engine.set_max_map_size(128);

    engine.register_custom_operator("not_in", 130)?;
    engine.register_fn("not_in", not_in);
    engine.register_fn("length", length);
    engine.register_fn("is_empty", |v: Dynamic| length(v).map(|n| n == 0));
    engine.register_fn("is_not_empty", |v: Dynamic| length(v).map(|n| n > 0));
    Ok(engine)
}
