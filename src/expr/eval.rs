//! Evaluator for parsed expressions against a store snapshot.

use serde_json::{json, Value};

use super::parser::{BinOp, Expr, UnOp};
use crate::store::FuncMap;

/// Evaluation environment: an owned snapshot plus the expression helpers.
pub struct Env<'a> {
    pub snapshot: Value,
    pub funcs: &'a FuncMap,
}

impl<'a> Env<'a> {
    pub fn new(snapshot: Value, funcs: &'a FuncMap) -> Self {
        Self { snapshot, funcs }
    }

    /// Resolve a bare identifier: snapshot key first, then a fallback into
    /// `vars` so unqualified names reach declared variables unless a bound
    /// value shadows them.
    fn lookup(&self, name: &str) -> Result<Value, String> {
        if let Some(v) = self.snapshot.get(name) {
            return Ok(v.clone());
        }
        if let Some(v) = self.snapshot.get("vars").and_then(|vars| vars.get(name)) {
            return Ok(v.clone());
        }
        Err(format!("unknown identifier: {name}"))
    }
}

pub fn eval_ast(expr: &Expr, env: &Env) -> Result<Value, String> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(json!(n)),
        Expr::Float(f) => Ok(json!(f)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => env.lookup(name),
        Expr::Member(obj, field) => {
            let base = eval_ast(obj, env)?;
            match base {
                Value::Null => Ok(Value::Null),
                Value::Object(m) => Ok(m.get(field).cloned().unwrap_or(Value::Null)),
                other => Err(format!(
                    "cannot access field {field:?} on non-object: {other}"
                )),
            }
        }
        Expr::Index(obj, idx) => {
            let base = eval_ast(obj, env)?;
            let index = eval_ast(idx, env)?;
            match (base, index) {
                (Value::Null, _) => Ok(Value::Null),
                (Value::Array(items), Value::Number(n)) => {
                    let i = n
                        .as_u64()
                        .ok_or_else(|| format!("array index is not a non-negative integer: {n}"))?;
                    Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
                }
                (Value::Object(m), Value::String(key)) => {
                    Ok(m.get(&key).cloned().unwrap_or(Value::Null))
                }
                (base, index) => Err(format!("cannot index {base} with {index}")),
            }
        }
        Expr::Call(name, args) => {
            let func = env
                .funcs
                .get(name)
                .ok_or_else(|| format!("unknown function: {name}"))?;
            let args: Vec<Value> = args
                .iter()
                .map(|a| eval_ast(a, env))
                .collect::<Result<_, _>>()?;
            func(&args)
        }
        Expr::Array(items) => {
            let items: Vec<Value> = items
                .iter()
                .map(|i| eval_ast(i, env))
                .collect::<Result<_, _>>()?;
            Ok(Value::Array(items))
        }
        Expr::Unary(UnOp::Not, inner) => match eval_ast(inner, env)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(format!("operand of ! is not a bool: {other}")),
        },
        Expr::Unary(UnOp::Neg, inner) => match eval_ast(inner, env)? {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(json!(-i))
                } else if let Some(f) = n.as_f64() {
                    Ok(json!(-f))
                } else {
                    Err(format!("cannot negate {n}"))
                }
            }
            other => Err(format!("operand of - is not a number: {other}")),
        },
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, env),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, env: &Env) -> Result<Value, String> {
    // Short-circuit before evaluating the right-hand side.
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = as_bool(eval_ast(lhs, env)?)?;
        return match (op, l) {
            (BinOp::And, false) => Ok(Value::Bool(false)),
            (BinOp::Or, true) => Ok(Value::Bool(true)),
            _ => Ok(Value::Bool(as_bool(eval_ast(rhs, env)?)?)),
        };
    }

    let l = eval_ast(lhs, env)?;
    let r = eval_ast(rhs, env)?;
    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &l, &r),
        BinOp::In => contains(&l, &r),
        BinOp::Add => match (&l, &r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => arithmetic(op, &l, &r),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => arithmetic(op, &l, &r),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn as_bool(v: Value) -> Result<bool, String> {
    match v {
        Value::Bool(b) => Ok(b),
        other => Err(format!("value is not a bool: {other}")),
    }
}

/// Structural equality with numeric coercion (1 == 1.0).
pub fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => l == r,
    }
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<Value, String> {
    let ord = match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (
                a.as_f64().ok_or_else(|| format!("not comparable: {a}"))?,
                b.as_f64().ok_or_else(|| format!("not comparable: {b}"))?,
            );
            a.partial_cmp(&b)
                .ok_or_else(|| "NaN is not comparable".to_string())?
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (l, r) => return Err(format!("cannot compare {l} with {r}")),
    };
    let result = match op {
        BinOp::Lt => ord.is_lt(),
        BinOp::Le => ord.is_le(),
        BinOp::Gt => ord.is_gt(),
        BinOp::Ge => ord.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn contains(needle: &Value, haystack: &Value) -> Result<Value, String> {
    let found = match haystack {
        Value::Array(items) => items.iter().any(|i| values_equal(needle, i)),
        Value::Object(m) => match needle {
            Value::String(key) => m.contains_key(key),
            other => return Err(format!("object membership needs a string key, got {other}")),
        },
        Value::String(s) => match needle {
            Value::String(sub) => s.contains(sub.as_str()),
            other => return Err(format!("string membership needs a string, got {other}")),
        },
        other => return Err(format!("right-hand side of 'in' is not a container: {other}")),
    };
    Ok(Value::Bool(found))
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Result<Value, String> {
    let (a, b) = match (l, r) {
        (Value::Number(a), Value::Number(b)) => (a, b),
        (l, r) => return Err(format!("cannot apply arithmetic to {l} and {r}")),
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err("division by zero".into());
                }
                a.checked_div(b)
            }
            BinOp::Rem => {
                if b == 0 {
                    return Err("division by zero".into());
                }
                a.checked_rem(b)
            }
            _ => unreachable!(),
        };
        return result
            .map(|n| json!(n))
            .ok_or_else(|| "integer overflow".to_string());
    }
    let (a, b) = (
        a.as_f64().ok_or_else(|| format!("not a number: {a}"))?,
        b.as_f64().ok_or_else(|| format!("not a number: {b}"))?,
    );
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err("division by zero".into());
            }
            a / b
        }
        BinOp::Rem => a % b,
        _ => unreachable!(),
    };
    Ok(json!(result))
}
