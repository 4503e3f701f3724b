//! Step parsing: one raw step map into a typed step.
//!
//! Reserved keys are stripped in a fixed order (`if`, `desc`, `loop` —
//! with the deprecated alias `retry` — then `test`, `dump`, `bind`).
//! Exactly one remaining entry selects the dispatch: `include`, `exec`,
//! or a declared runner key. A step with no dispatch must carry at least
//! one post-hook.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{Error, Result};
use crate::loops::Loop;
use crate::store::RESERVED_KEYS;

/// Declared runner keys, used to classify the dispatch entry.
#[derive(Debug, Default)]
pub struct RunnerKeys {
    pub http: HashSet<String>,
    pub db: HashSet<String>,
    pub grpc: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub key: String,
    pub desc: String,
    pub if_cond: Option<String>,
    pub loop_cfg: Option<Loop>,
    pub dispatch: Option<Dispatch>,
    pub test_cond: Option<String>,
    pub dump_expr: Option<String>,
    pub bind_exprs: Vec<(String, String)>,
}

impl Step {
    pub fn has_hooks(&self) -> bool {
        self.test_cond.is_some() || self.dump_expr.is_some() || !self.bind_exprs.is_empty()
    }

    /// The runner key this step dispatches to, if any.
    pub fn runner_key(&self) -> Option<&str> {
        match &self.dispatch {
            Some(Dispatch::Http { runner, .. })
            | Some(Dispatch::Db { runner, .. })
            | Some(Dispatch::Grpc { runner, .. }) => Some(runner),
            Some(Dispatch::Exec { .. }) => Some("exec"),
            Some(Dispatch::Include(_)) => Some("include"),
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Dispatch {
    Http { runner: String, request: Value },
    Db { runner: String, query: Value },
    Grpc { runner: String, request: Value },
    Exec { command: Value },
    Include(IncludeConfig),
}

#[derive(Debug, Clone)]
pub struct IncludeConfig {
    pub path: String,
    /// Raw variable overrides; expanded against the parent snapshot at
    /// include time.
    pub vars: Map<String, Value>,
    pub skip_test: bool,
}

impl IncludeConfig {
    fn parse(v: &Value) -> Result<Self> {
        match v {
            Value::String(path) => Ok(Self {
                path: path.clone(),
                vars: Map::new(),
                skip_test: false,
            }),
            Value::Object(m) => {
                let path = m
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Build("include needs a path".into()))?
                    .to_string();
                let vars = match m.get("vars") {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(vars)) => vars.clone(),
                    Some(other) => {
                        return Err(Error::Build(format!("invalid include vars: {other}")))
                    }
                };
                let skip_test = match m.get("skipTest") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => *b,
                    Some(other) => {
                        return Err(Error::Build(format!("invalid include skipTest: {other}")))
                    }
                };
                for key in m.keys() {
                    if !matches!(key.as_str(), "path" | "vars" | "skipTest") {
                        return Err(Error::Build(format!("unknown include field: {key}")));
                    }
                }
                Ok(Self {
                    path,
                    vars,
                    skip_test,
                })
            }
            other => Err(Error::Build(format!("invalid include config: {other}"))),
        }
    }
}

/// Parse one raw step map into a typed step.
pub fn build_step(key: &str, raw: &Map<String, Value>, runners: &RunnerKeys) -> Result<Step> {
    let mut rest = raw.clone();
    let mut step = Step {
        key: key.to_string(),
        desc: String::new(),
        if_cond: None,
        loop_cfg: None,
        dispatch: None,
        test_cond: None,
        dump_expr: None,
        bind_exprs: Vec::new(),
    };

    if let Some(v) = rest.shift_remove("if") {
        step.if_cond = Some(as_string(&v).ok_or_else(|| {
            Error::Build(format!("invalid if condition on step {key}: {v}"))
        })?);
    }
    if let Some(v) = rest.shift_remove("desc") {
        step.desc = as_string(&v)
            .ok_or_else(|| Error::Build(format!("invalid desc on step {key}: {v}")))?;
    }
    if let Some(v) = rest.shift_remove("loop") {
        step.loop_cfg = Some(Loop::parse(&v)?);
    }
    if let Some(v) = rest.shift_remove("retry") {
        warn!(step = key, "`retry:` is deprecated, use `loop:`");
        step.loop_cfg = Some(Loop::parse(&v)?);
    }
    if let Some(v) = rest.shift_remove("test") {
        step.test_cond = Some(match v {
            Value::Bool(b) => b.to_string(),
            Value::String(s) => s,
            other => {
                return Err(Error::Build(format!(
                    "invalid test condition on step {key}: {other}"
                )))
            }
        });
    }
    if let Some(v) = rest.shift_remove("dump") {
        step.dump_expr = Some(as_string(&v).ok_or_else(|| {
            Error::Build(format!("invalid dump expression on step {key}: {v}"))
        })?);
    }
    if let Some(v) = rest.shift_remove("bind") {
        let m = v
            .as_object()
            .ok_or_else(|| Error::Build(format!("invalid bind on step {key}: {v}")))?;
        for (name, expr) in m {
            if RESERVED_KEYS.contains(&name.as_str()) {
                return Err(Error::Build(format!(
                    "cannot bind reserved key on step {key}: {name}"
                )));
            }
            let expr = expr.as_str().ok_or_else(|| {
                Error::Build(format!("invalid bind value on step {key}: {expr}"))
            })?;
            step.bind_exprs.push((name.clone(), expr.to_string()));
        }
    }

    let mut remaining = rest.into_iter();
    let dispatch = remaining.next();
    if let Some((extra, _)) = remaining.next() {
        return Err(Error::Build(format!(
            "step {key} has more than one dispatch entry (found {extra:?})"
        )));
    }

    step.dispatch = match dispatch {
        None => {
            if !step.has_hooks() {
                return Err(Error::Build(format!(
                    "step {key} has no runner and no test/dump/bind"
                )));
            }
            None
        }
        Some((name, payload)) => Some(classify(key, &name, payload, runners)?),
    };

    Ok(step)
}

fn classify(
    step_key: &str,
    name: &str,
    payload: Value,
    runners: &RunnerKeys,
) -> Result<Dispatch> {
    match name {
        "include" => Ok(Dispatch::Include(IncludeConfig::parse(&payload)?)),
        "exec" => {
            if !payload.is_object() {
                return Err(Error::Build(format!(
                    "invalid exec command on step {step_key}: {payload}"
                )));
            }
            Ok(Dispatch::Exec { command: payload })
        }
        key if runners.http.contains(key) => {
            require_object(step_key, "http request", &payload)?;
            Ok(Dispatch::Http {
                runner: key.to_string(),
                request: payload,
            })
        }
        key if runners.db.contains(key) => {
            require_object(step_key, "db query", &payload)?;
            Ok(Dispatch::Db {
                runner: key.to_string(),
                query: payload,
            })
        }
        key if runners.grpc.contains(key) => {
            require_object(step_key, "gRPC request", &payload)?;
            Ok(Dispatch::Grpc {
                runner: key.to_string(),
                request: payload,
            })
        }
        key => Err(Error::UnknownRunnerKey(key.to_string())),
    }
}

fn require_object(step_key: &str, what: &str, payload: &Value) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(Error::Build(format!(
            "invalid {what} on step {step_key}: {payload}"
        )))
    }
}

fn as_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}
