//! Programmatic runbook construction from CLI inputs.
//!
//! `curl …` argument lists become HTTP steps with a DSN-derived runner
//! key; anything else becomes an exec step. The result serializes to
//! canonical runbook YAML.

use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};

use crate::errors::{Error, Result};

const HTTP_KEY_PREFIX: &str = "req";
const GRPC_KEY_PREFIX: &str = "greq";
const DB_KEY_PREFIX: &str = "db";

#[derive(Debug, Default)]
pub struct RunbookBuilder {
    desc: String,
    runners: Vec<(String, String)>,
    steps: Vec<Yaml>,
}

impl RunbookBuilder {
    pub fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            ..Default::default()
        }
    }

    /// Append one step from raw CLI tokens.
    pub fn append_step(&mut self, tokens: &[String]) -> Result<()> {
        match tokens.first() {
            None => Err(Error::Build("no step tokens given".into())),
            Some(first) if first.starts_with("curl") => self.curl_to_step(tokens),
            Some(_) => self.cmd_to_step(tokens),
        }
    }

    fn curl_to_step(&mut self, tokens: &[String]) -> Result<()> {
        let req = parse_curl(tokens)?;
        let (dsn, path) = split_dsn(&req.url)?;
        let key = self.set_runner(&dsn);

        let mut detail = Mapping::new();
        if !req.headers.is_empty() {
            let mut headers = Mapping::new();
            for (k, v) in &req.headers {
                headers.insert(Yaml::from(k.clone()), Yaml::from(v.clone()));
            }
            detail.insert(Yaml::from("headers"), Yaml::Mapping(headers));
        }
        if let Some(body) = &req.body {
            let value = match serde_json::from_str::<Value>(body) {
                Ok(json) => json_to_yaml(&json),
                Err(_) => Yaml::from(body.clone()),
            };
            detail.insert(Yaml::from("body"), value);
        }

        let mut method_map = Mapping::new();
        method_map.insert(
            Yaml::from(req.method.to_lowercase()),
            if detail.is_empty() {
                Yaml::Null
            } else {
                Yaml::Mapping(detail)
            },
        );
        let mut path_map = Mapping::new();
        path_map.insert(Yaml::from(path), Yaml::Mapping(method_map));
        let mut step = Mapping::new();
        step.insert(Yaml::from(key), Yaml::Mapping(path_map));
        self.steps.push(Yaml::Mapping(step));
        Ok(())
    }

    fn cmd_to_step(&mut self, tokens: &[String]) -> Result<()> {
        let mut command = Mapping::new();
        command.insert(Yaml::from("command"), Yaml::from(join_command(tokens)));
        let mut step = Mapping::new();
        step.insert(Yaml::from("exec"), Yaml::Mapping(command));
        self.steps.push(Yaml::Mapping(step));
        Ok(())
    }

    /// Reuse the runner key for a known DSN, otherwise allocate the next
    /// ordinal for the DSN's scheme family.
    fn set_runner(&mut self, dsn: &str) -> String {
        let (mut http_count, mut grpc_count, mut db_count) = (0usize, 0usize, 0usize);
        for (key, existing) in &self.runners {
            if existing == dsn {
                return key.clone();
            }
            if existing.starts_with("http") {
                http_count += 1;
            } else if existing.starts_with("grpc") {
                grpc_count += 1;
            } else {
                db_count += 1;
            }
        }

        let (prefix, count) = if dsn.starts_with("http") {
            (HTTP_KEY_PREFIX, http_count)
        } else if dsn.starts_with("grpc") {
            (GRPC_KEY_PREFIX, grpc_count)
        } else {
            (DB_KEY_PREFIX, db_count)
        };
        let key = if count > 0 {
            format!("{prefix}{}", count + 1)
        } else {
            prefix.to_string()
        };
        self.runners.push((key.clone(), dsn.to_string()));
        key
    }

    /// Serialize with canonical top-level key order.
    pub fn to_yaml(&self) -> Result<String> {
        let mut doc = Mapping::new();
        doc.insert(Yaml::from("desc"), Yaml::from(self.desc.clone()));
        if !self.runners.is_empty() {
            let mut runners = Mapping::new();
            for (k, dsn) in &self.runners {
                runners.insert(Yaml::from(k.clone()), Yaml::from(dsn.clone()));
            }
            doc.insert(Yaml::from("runners"), Yaml::Mapping(runners));
        }
        doc.insert(Yaml::from("steps"), Yaml::Sequence(self.steps.clone()));
        serde_yaml::to_string(&Yaml::Mapping(doc)).map_err(Error::from)
    }
}

#[derive(Debug, PartialEq)]
struct CurlRequest {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

fn parse_curl(tokens: &[String]) -> Result<CurlRequest> {
    let mut method: Option<String> = None;
    let mut url: Option<String> = None;
    let mut headers = Vec::new();
    let mut body: Option<String> = None;

    let mut iter = tokens.iter().skip(1).peekable();
    while let Some(tok) = iter.next() {
        match tok.as_str() {
            "-X" | "--request" => {
                method = Some(next_value(&mut iter, tok)?);
            }
            "-H" | "--header" => {
                let raw = next_value(&mut iter, tok)?;
                let (k, v) = raw
                    .split_once(':')
                    .ok_or_else(|| Error::Build(format!("invalid header: {raw}")))?;
                headers.push((k.trim().to_string(), v.trim().to_string()));
            }
            "-d" | "--data" | "--data-raw" | "--data-binary" | "--data-ascii" => {
                body = Some(next_value(&mut iter, tok)?);
            }
            "--url" => {
                url = Some(next_value(&mut iter, tok)?);
            }
            "-u" | "--user" | "-o" | "--output" | "-A" | "--user-agent" => {
                // Flag with a value we do not map onto a step.
                next_value(&mut iter, tok)?;
            }
            flag if flag.starts_with('-') => {}
            bare => {
                url = Some(bare.trim_matches(|c| c == '\'' || c == '"').to_string());
            }
        }
    }

    let url = url.ok_or_else(|| Error::Build("curl command has no URL".into()))?;
    let method = method.unwrap_or_else(|| {
        if body.is_some() {
            "POST".to_string()
        } else {
            "GET".to_string()
        }
    });
    Ok(CurlRequest {
        method,
        url,
        headers,
        body,
    })
}

fn next_value(
    iter: &mut std::iter::Peekable<std::iter::Skip<std::slice::Iter<'_, String>>>,
    flag: &str,
) -> Result<String> {
    iter.next()
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
        .ok_or_else(|| Error::Build(format!("curl flag {flag} needs a value")))
}

/// Split a URL into `scheme://host` and the path-with-query remainder.
fn split_dsn(url: &str) -> Result<(String, String)> {
    let scheme_end = url
        .find("://")
        .ok_or_else(|| Error::Build(format!("invalid URL: {url}")))?;
    let host_start = scheme_end + 3;
    let rest = &url[host_start..];
    let host_end = rest.find('/').map(|i| host_start + i);
    match host_end {
        Some(i) => Ok((url[..i].to_string(), url[i..].to_string())),
        None => Ok((url.to_string(), "/".to_string())),
    }
}

fn join_command(tokens: &[String]) -> String {
    let mut parts = Vec::with_capacity(tokens.len());
    for tok in tokens {
        let tok = tok.trim_end_matches('\n');
        if tok.contains(char::is_whitespace) {
            parts.push(format!("{tok:?}"));
        } else {
            parts.push(tok.to_string());
        }
    }
    format!("{}\n", parts.join(" "))
}

fn json_to_yaml(v: &Value) -> Yaml {
    match v {
        Value::Null => Yaml::Null,
        Value::Bool(b) => Yaml::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Yaml::from(i)
            } else {
                Yaml::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => Yaml::from(s.clone()),
        Value::Array(items) => Yaml::Sequence(items.iter().map(json_to_yaml).collect()),
        Value::Object(m) => {
            let mut out = Mapping::new();
            for (k, v) in m {
                out.insert(Yaml::from(k.clone()), json_to_yaml(v));
            }
            Yaml::Mapping(out)
        }
    }
}
