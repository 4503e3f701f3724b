//! Expression engine for runbook conditions and payload interpolation.
//!
//! - `eval` / `eval_cond` / `eval_count`: evaluate a source expression
//!   against a store snapshot
//! - `expand`: walk a payload value, resolving `{{ expr }}` holes — a
//!   string that is exactly one hole keeps the typed result
//! - `build_tree`: render a condition with its evaluated leaves, used by
//!   assertion failures and loop exhaustion messages
//!
//! Evaluation is pure with respect to the snapshot.

mod eval;
mod lexer;
mod parser;

pub use eval::Env;

use serde_json::Value;

use crate::errors::{Error, Result};
use parser::{to_src, BinOp, Expr, UnOp};

fn expr_err(src: &str, msg: impl std::fmt::Display) -> Error {
    Error::Expr(format!("{msg} in {src:?}"))
}

/// Evaluate an expression to a value.
pub fn eval(src: &str, env: &Env) -> Result<Value> {
    let ast = parser::parse(src).map_err(|e| expr_err(src, e))?;
    eval::eval_ast(&ast, env).map_err(|e| expr_err(src, e))
}

/// Evaluate a condition; the result must be a bool.
pub fn eval_cond(src: &str, env: &Env) -> Result<bool> {
    match eval(src, env)? {
        Value::Bool(b) => Ok(b),
        other => Err(expr_err(src, format!("condition is not a bool: {other}"))),
    }
}

/// Evaluate a count expression; the result must be a non-negative integer.
pub fn eval_count(src: &str, env: &Env) -> Result<usize> {
    match eval(src, env)? {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| expr_err(src, format!("count is not a non-negative integer: {n}"))),
        other => Err(expr_err(src, format!("count is not an integer: {other}"))),
    }
}

/// Expand `{{ expr }}` holes throughout a payload value.
pub fn expand(value: &Value, env: &Env) -> Result<Value> {
    match value {
        Value::String(s) => expand_str(s, env),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| expand(v, env))
                .collect::<Result<Vec<_>>>()?,
        )),
        Value::Object(m) => {
            let mut out = serde_json::Map::new();
            for (k, v) in m {
                out.insert(k.clone(), expand(v, env)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

enum Seg<'a> {
    Text(&'a str),
    Hole(&'a str),
}

fn split_holes(s: &str) -> Result<Vec<Seg<'_>>> {
    let mut segs = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let (text, after) = rest.split_at(start);
        if !text.is_empty() {
            segs.push(Seg::Text(text));
        }
        let after = &after[2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::Expr(format!("unterminated template hole in {s:?}")))?;
        segs.push(Seg::Hole(after[..end].trim()));
        rest = &after[end + 2..];
    }
    if !rest.is_empty() {
        segs.push(Seg::Text(rest));
    }
    Ok(segs)
}

fn expand_str(s: &str, env: &Env) -> Result<Value> {
    let segs = split_holes(s)?;
    if !segs.iter().any(|seg| matches!(seg, Seg::Hole(_))) {
        return Ok(Value::String(s.to_string()));
    }
    // A string that is exactly one hole keeps its typed result.
    if let [Seg::Hole(expr)] = segs.as_slice() {
        return eval(expr, env);
    }
    let mut out = String::new();
    for seg in segs {
        match seg {
            Seg::Text(t) => out.push_str(t),
            Seg::Hole(expr) => out.push_str(&stringify(&eval(expr, env)?)),
        }
    }
    Ok(Value::String(out))
}

fn stringify(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a condition as a tree: the source line followed by every leaf
/// operand with its evaluated value.
pub fn build_tree(src: &str, env: &Env) -> Result<String> {
    let ast = parser::parse(src).map_err(|e| expr_err(src, e))?;
    let mut leaves = Vec::new();
    collect_leaves(&ast, &mut leaves);

    let mut lines = vec![src.trim().to_string()];
    let mut seen = std::collections::HashSet::new();
    let printable: Vec<(String, String)> = leaves
        .into_iter()
        .filter_map(|leaf| {
            let text = to_src(&leaf);
            if !seen.insert(text.clone()) {
                return None;
            }
            let rendered = match eval::eval_ast(&leaf, env) {
                Ok(v) => v.to_string(),
                Err(e) => format!("?({e})"),
            };
            Some((text, rendered))
        })
        .collect();
    for (i, (text, rendered)) in printable.iter().enumerate() {
        let branch = if i + 1 == printable.len() {
            "└──"
        } else {
            "├──"
        };
        lines.push(format!("{branch} {text} => {rendered}"));
    }
    Ok(lines.join("\n"))
}

fn collect_leaves(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Binary(BinOp::And | BinOp::Or, lhs, rhs) => {
            collect_leaves(lhs, out);
            collect_leaves(rhs, out);
        }
        Expr::Binary(_, lhs, rhs) => {
            out.push((**lhs).clone());
            out.push((**rhs).clone());
        }
        Expr::Unary(UnOp::Not, inner) => collect_leaves(inner, out),
        other => out.push(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{default_funcs, FuncMap};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn with_env<T>(snapshot: Value, f: impl FnOnce(&Env) -> T) -> T {
        let funcs: FuncMap = default_funcs();
        let env = Env::new(snapshot, &funcs);
        f(&env)
    }

    #[test]
    fn eval_cond_requires_bool() {
        with_env(json!({"vars": {"n": 1}}), |env| {
            assert!(eval_cond("vars.n == 1", env).unwrap());
            assert!(eval_cond("vars.n", env).is_err());
        });
    }

    #[test]
    fn expand_keeps_typed_single_hole() {
        with_env(json!({"vars": {"port": 8080, "body": {"a": 1}}}), |env| {
            let input = json!({
                "port": "{{ vars.port }}",
                "url": "http://localhost:{{ vars.port }}/x",
                "body": "{{ vars.body }}"
            });
            let out = expand(&input, env).unwrap();
            assert_eq!(out["port"], json!(8080));
            assert_eq!(out["url"], json!("http://localhost:8080/x"));
            assert_eq!(out["body"], json!({"a": 1}));
        });
    }

    #[test]
    fn expand_walks_arrays_and_objects() {
        with_env(json!({"vars": {"name": "alice"}}), |env| {
            let input = json!({"greetings": ["hi {{ vars.name }}", {"to": "{{ vars.name }}"}]});
            let out = expand(&input, env).unwrap();
            assert_eq!(out["greetings"][0], json!("hi alice"));
            assert_eq!(out["greetings"][1]["to"], json!("alice"));
        });
    }

    #[test]
    fn expand_rejects_unterminated_hole() {
        with_env(json!({"vars": {}}), |env| {
            assert!(expand(&json!("{{ vars.x"), env).is_err());
        });
    }

    #[test]
    fn expand_null_hole_interpolates_empty() {
        with_env(json!({"vars": {}, "current": null}), |env| {
            let out = expand(&json!("x={{ current }}!"), env).unwrap();
            assert_eq!(out, json!("x=!"));
        });
    }

    #[test]
    fn tree_shows_leaf_values() {
        with_env(json!({"steps": [{"res": {"status": 500}}], "vars": {}}), |env| {
            let tree = build_tree("steps[0].res.status == 200", env).unwrap();
            assert_eq!(
                tree,
                "steps[0].res.status == 200\n├── steps[0].res.status => 500\n└── 200 => 200"
            );
        });
    }

    #[test]
    fn tree_recurses_into_logic_operators() {
        with_env(json!({"vars": {"a": 1, "b": 2}}), |env| {
            let tree = build_tree("vars.a == 1 && vars.b == 1", env).unwrap();
            assert!(tree.contains("vars.a => 1"));
            assert!(tree.contains("vars.b => 2"));
        });
    }

    #[test]
    fn eval_count_accepts_integers_only() {
        with_env(json!({"vars": {"n": 3}}), |env| {
            assert_eq!(eval_count("vars.n", env).unwrap(), 3);
            assert!(eval_count("'three'", env).is_err());
            assert!(eval_count("-1", env).is_err());
        });
    }
}
