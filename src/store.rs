//! Per-run store of observed values.
//!
//! A store belongs to exactly one operator. Steps record one frame each
//! (`record`), `bind:` hooks write named values (`bind`), and the
//! expression engine reads everything through an immutable `snapshot`.
//! While a loop body runs, `loop_index` marks the frame of the current
//! iteration so the next iteration replaces it instead of appending.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::errors::{Error, Result};

/// The map recorded by one executed step.
pub type Frame = Value;

/// Expression helper callable from runbook expressions.
pub type NativeFunc = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// Named expression helpers, merged into the evaluation environment.
pub type FuncMap = HashMap<String, NativeFunc>;

/// Snapshot keys that `bind:` may not shadow.
pub const RESERVED_KEYS: [&str; 8] = [
    "vars",
    "steps",
    "bindVars",
    "env",
    "included",
    "current",
    "previous",
    "loopIndex",
];

pub struct Store {
    vars: Map<String, Value>,
    funcs: FuncMap,
    bind_vars: Map<String, Value>,
    steps: Vec<Frame>,
    step_map: Map<String, Value>,
    step_keys: Vec<String>,
    use_map: bool,
    included: bool,
    /// Set only while a loop body runs.
    pub loop_index: Option<usize>,
}

impl Store {
    pub fn new(
        vars: Map<String, Value>,
        funcs: FuncMap,
        step_keys: Vec<String>,
        use_map: bool,
        included: bool,
    ) -> Self {
        Self {
            vars,
            funcs,
            bind_vars: Map::new(),
            steps: Vec::new(),
            step_map: Map::new(),
            step_keys,
            use_map,
            included,
            loop_index: None,
        }
    }

    pub fn funcs(&self) -> &FuncMap {
        &self.funcs
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub fn bind_vars(&self) -> &Map<String, Value> {
        &self.bind_vars
    }

    /// Number of frames recorded so far.
    pub fn len(&self) -> usize {
        if self.use_map {
            self.step_map.len()
        } else {
            self.steps.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record one frame. Inside a loop iteration after the first, the
    /// previous iteration's frame is replaced instead of a new one being
    /// appended.
    pub fn record(&mut self, frame: Frame) {
        if self.use_map {
            self.record_mapped(frame);
        } else {
            self.record_listed(frame);
        }
    }

    fn record_listed(&mut self, frame: Frame) {
        if matches!(self.loop_index, Some(i) if i > 0) {
            self.steps.pop();
        }
        self.steps.push(frame);
    }

    fn record_mapped(&mut self, frame: Frame) {
        // Replacing the previous iteration means writing the same author
        // key again; insertion order is preserved either way.
        let idx = if matches!(self.loop_index, Some(i) if i > 0) {
            self.step_map.len().saturating_sub(1)
        } else {
            self.step_map.len()
        };
        let key = self
            .step_keys
            .get(idx)
            .cloned()
            .unwrap_or_else(|| idx.to_string());
        self.step_map.insert(key, frame);
    }

    /// The most recently recorded frame.
    pub fn latest(&self) -> Option<&Frame> {
        if self.use_map {
            self.step_map.values().last()
        } else {
            self.steps.last()
        }
    }

    fn previous(&self) -> Option<&Frame> {
        let n = self.len();
        if n < 2 {
            return None;
        }
        if self.use_map {
            self.step_map.values().nth(n - 2)
        } else {
            self.steps.get(n - 2)
        }
    }

    /// Assign a bound value, visible to every later step and to included
    /// runbooks. Reserved snapshot keys are rejected.
    pub fn bind(&mut self, name: &str, value: Value) -> Result<()> {
        if RESERVED_KEYS.contains(&name) {
            return Err(Error::Build(format!("cannot bind reserved key: {name}")));
        }
        self.bind_vars.insert(name.to_string(), value);
        Ok(())
    }

    /// Copy bound values in from a parent store (include inheritance).
    pub fn inherit_bind_vars(&mut self, parent: &Map<String, Value>) {
        for (k, v) in parent {
            self.bind_vars.insert(k.clone(), v.clone());
        }
    }

    /// The recorded frames as one value: an array in list mode, an object
    /// in map mode.
    pub fn frames_value(&self) -> Value {
        if self.use_map {
            Value::Object(self.step_map.clone())
        } else {
            Value::Array(self.steps.clone())
        }
    }

    /// Compose the read-only view handed to the expression engine.
    ///
    /// Bound values are merged top-level (reserved keys win), so a bound
    /// name shadows a same-named entry under `vars` when referenced bare.
    pub fn snapshot(&self) -> Value {
        let mut m = Map::new();
        for (k, v) in &self.bind_vars {
            m.insert(k.clone(), v.clone());
        }
        let env: Map<String, Value> = std::env::vars()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        m.insert("env".into(), Value::Object(env));
        m.insert("vars".into(), Value::Object(self.vars.clone()));
        m.insert("steps".into(), self.frames_value());
        m.insert("bindVars".into(), Value::Object(self.bind_vars.clone()));
        m.insert("included".into(), Value::Bool(self.included));
        m.insert(
            "current".into(),
            self.latest().cloned().unwrap_or(Value::Null),
        );
        m.insert(
            "previous".into(),
            self.previous().cloned().unwrap_or(Value::Null),
        );
        if let Some(i) = self.loop_index {
            m.insert("loopIndex".into(), json!(i));
        }
        Value::Object(m)
    }
}

/// Expression helpers available in every runbook.
pub fn default_funcs() -> FuncMap {
    let mut funcs: FuncMap = HashMap::new();

    fn single<'a>(name: &str, args: &'a [Value]) -> std::result::Result<&'a Value, String> {
        match args {
            [v] => Ok(v),
            _ => Err(format!("{name} expects exactly one argument")),
        }
    }

    funcs.insert(
        "len".into(),
        Arc::new(|args| {
            let n = match single("len", args)? {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => return Err(format!("len: unsupported value: {other}")),
            };
            Ok(json!(n))
        }),
    );
    funcs.insert(
        "upper".into(),
        Arc::new(|args| match single("upper", args)? {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(format!("upper: not a string: {other}")),
        }),
    );
    funcs.insert(
        "lower".into(),
        Arc::new(|args| match single("lower", args)? {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(format!("lower: not a string: {other}")),
        }),
    );
    funcs.insert(
        "trim".into(),
        Arc::new(|args| match single("trim", args)? {
            Value::String(s) => Ok(Value::String(s.trim().to_string())),
            other => Err(format!("trim: not a string: {other}")),
        }),
    );
    funcs.insert(
        "string".into(),
        Arc::new(|args| {
            let v = single("string", args)?;
            Ok(Value::String(match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }))
        }),
    );
    funcs
}
