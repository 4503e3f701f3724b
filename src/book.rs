//! Runbook file model and loading.
//!
//! A book mirrors the YAML structure: `desc`, optional top-level `if`,
//! ordered `runners`, `vars`, and `steps` as either a sequence
//! (positional keys `"0"`, `"1"`, …) or a mapping (author keys). Which
//! form was used is fixed at load time and governs how results are
//! recorded.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub struct Book {
    pub desc: String,
    pub if_cond: Option<String>,
    /// Runner declarations in order: author key to DSN or config object.
    pub runners: Vec<(String, Value)>,
    pub vars: Map<String, Value>,
    /// Raw step maps in declaration order, keyed positionally or by
    /// author key.
    pub raw_steps: Vec<(String, Map<String, Value>)>,
    pub use_map: bool,
    pub path: Option<PathBuf>,
    source: String,
}

impl Book {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)
            .map_err(|e| Error::Build(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&src, Some(path.to_path_buf()))
    }

    pub fn parse(src: &str, path: Option<PathBuf>) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(src)?;
        let map = match doc {
            serde_yaml::Value::Mapping(m) => m,
            other => {
                return Err(Error::Build(format!(
                    "runbook must be a mapping, got {}",
                    yaml_kind(&other)
                )))
            }
        };

        let mut book = Book {
            desc: String::new(),
            if_cond: None,
            runners: Vec::new(),
            vars: Map::new(),
            raw_steps: Vec::new(),
            use_map: false,
            path,
            source: src.to_string(),
        };

        for (k, v) in &map {
            let key = k
                .as_str()
                .ok_or_else(|| Error::Build(format!("non-string top-level key: {k:?}")))?;
            match key {
                "desc" => {
                    book.desc = v
                        .as_str()
                        .ok_or_else(|| Error::Build(format!("invalid desc: {v:?}")))?
                        .to_string();
                }
                "if" => {
                    book.if_cond = Some(
                        v.as_str()
                            .ok_or_else(|| Error::Build(format!("invalid if condition: {v:?}")))?
                            .to_string(),
                    );
                }
                "runners" => {
                    let m = match v {
                        serde_yaml::Value::Mapping(m) => m,
                        other => {
                            return Err(Error::Build(format!(
                                "runners must be a mapping, got {}",
                                yaml_kind(other)
                            )))
                        }
                    };
                    for (rk, rv) in m {
                        let rk = rk.as_str().ok_or_else(|| {
                            Error::Build(format!("non-string runner key: {rk:?}"))
                        })?;
                        book.runners.push((rk.to_string(), yaml_to_json(rv)?));
                    }
                }
                "vars" => {
                    match yaml_to_json(v)? {
                        Value::Object(m) => book.vars = m,
                        Value::Null => {}
                        other => {
                            return Err(Error::Build(format!("vars must be a mapping: {other}")))
                        }
                    };
                }
                "steps" => match v {
                    serde_yaml::Value::Sequence(items) => {
                        for (i, item) in items.iter().enumerate() {
                            book.raw_steps.push((i.to_string(), step_map(item)?));
                        }
                    }
                    serde_yaml::Value::Mapping(m) => {
                        book.use_map = true;
                        for (sk, sv) in m {
                            let sk = sk.as_str().ok_or_else(|| {
                                Error::Build(format!("non-string step key: {sk:?}"))
                            })?;
                            book.raw_steps.push((sk.to_string(), step_map(sv)?));
                        }
                    }
                    other => {
                        return Err(Error::Build(format!(
                            "steps must be a sequence or mapping, got {}",
                            yaml_kind(other)
                        )))
                    }
                },
                other => {
                    warn!(key = other, "ignoring unknown top-level key");
                }
            }
        }

        Ok(book)
    }

    /// Deterministic id: hash of the book source and its path.
    pub fn operator_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        if let Some(p) = &self.path {
            hasher.update(p.display().to_string().as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..12].to_string()
    }

    /// Directory relative include paths are resolved against.
    pub fn root(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(p
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Display path for reporting; empty when built programmatically.
    pub fn display_path(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

fn step_map(v: &serde_yaml::Value) -> Result<Map<String, Value>> {
    match yaml_to_json(v)? {
        Value::Object(m) => Ok(m),
        other => Err(Error::Build(format!("step must be a mapping: {other}"))),
    }
}

fn yaml_kind(v: &serde_yaml::Value) -> &'static str {
    match v {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

/// Convert parsed YAML into the JSON value model used everywhere else.
/// Mapping keys must be scalars; YAML tags are rejected.
pub fn yaml_to_json(v: &serde_yaml::Value) -> Result<Value> {
    Ok(match v {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(f) = n.as_f64() {
                Value::from(f)
            } else {
                return Err(Error::Build(format!("unsupported number: {n}")));
            }
        }
        serde_yaml::Value::String(s) => Value::String(s.clone()),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(m) => {
            let mut out = Map::new();
            for (k, v) in m {
                let key = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(Error::Build(format!(
                            "unsupported mapping key: {}",
                            yaml_kind(other)
                        )))
                    }
                };
                out.insert(key, yaml_to_json(v)?);
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(t) => {
            return Err(Error::Build(format!("unsupported YAML tag: {}", t.tag)))
        }
    })
}
