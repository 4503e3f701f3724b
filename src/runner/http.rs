//! HTTP runner backed by a shared reqwest client.

use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::capture::Capturers;
use crate::errors::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpRunner {
    key: String,
    base: String,
    client: reqwest::Client,
}

/// Parsed step payload: `{"/path": {method: {headers?, query?, body?}}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpStepRequest {
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRunner {
    /// `config` is a DSN string (`http://…` or `https://…`) or an object
    /// `{url, timeout?}`.
    pub fn new(key: &str, config: &Value) -> Result<Self> {
        let (url, timeout) = match config {
            Value::String(url) => (url.clone(), REQUEST_TIMEOUT),
            Value::Object(m) => {
                let url = m
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Build(format!("runner {key}: missing url")))?
                    .to_string();
                let timeout = match m.get("timeout") {
                    None | Some(Value::Null) => REQUEST_TIMEOUT,
                    Some(Value::String(s)) => humantime::parse_duration(s)
                        .map_err(|e| Error::Build(format!("runner {key}: bad timeout: {e}")))?,
                    Some(other) => {
                        return Err(Error::Build(format!("runner {key}: bad timeout: {other}")))
                    }
                };
                (url, timeout)
            }
            other => {
                return Err(Error::Build(format!(
                    "runner {key}: invalid http config: {other}"
                )))
            }
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Build(format!("runner {key}: not an http DSN: {url}")));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("opsbook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Build(format!("runner {key}: {e}")))?;
        Ok(Self {
            key: key.to_string(),
            base: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn run(
        &self,
        req: &HttpStepRequest,
        caps: &mut Capturers,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base, req.path);
        let method = Method::from_bytes(req.method.to_uppercase().as_bytes())
            .map_err(|_| Error::Build(format!("invalid http method: {}", req.method)))?;

        let mut builder = self.client.request(method, &url);
        let mut content_type: Option<String> = None;
        for (k, v) in &req.headers {
            if k.eq_ignore_ascii_case("content-type") {
                content_type = Some(v.clone());
            }
            builder = builder.header(k, v);
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            let json_body = match &content_type {
                Some(ct) => ct.contains("json"),
                None => true,
            };
            if json_body {
                builder = builder.json(body);
            } else {
                let raw = match body {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                builder = builder.body(raw);
            }
        }

        let req_value = request_value(req, &url);
        caps.http_request(&req_value);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            r = builder.send() => r.map_err(|e| Error::Runner {
                kind: "http request",
                message: e.to_string(),
            })?,
        };

        let status = response.status().as_u16();
        let mut headers = Map::new();
        for key in response.headers().keys() {
            let values: Vec<Value> = response
                .headers()
                .get_all(key)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(|v| Value::String(v.to_string()))
                .collect();
            headers.insert(key.as_str().to_lowercase(), Value::Array(values));
        }
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            t = response.text() => t.map_err(|e| Error::Runner {
                kind: "http request",
                message: e.to_string(),
            })?,
        };
        let body = if text.is_empty() {
            Value::Null
        } else if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        let res_value = json!({
            "status": status,
            "headers": Value::Object(headers),
            "body": body,
        });
        caps.http_response(&res_value);

        Ok(json!({"req": req_value, "res": res_value}))
    }
}

fn request_value(req: &HttpStepRequest, url: &str) -> Value {
    let headers: Map<String, Value> = req
        .headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), Value::String(v.clone())))
        .collect();
    let query: Map<String, Value> = req
        .query
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut m = Map::new();
    m.insert("url".into(), Value::String(url.to_string()));
    m.insert("path".into(), Value::String(req.path.clone()));
    m.insert("method".into(), Value::String(req.method.to_uppercase()));
    if !headers.is_empty() {
        m.insert("headers".into(), Value::Object(headers));
    }
    if !query.is_empty() {
        m.insert("query".into(), Value::Object(query));
    }
    m.insert("body".into(), req.body.clone().unwrap_or(Value::Null));
    Value::Object(m)
}

const METHODS: [&str; 7] = ["get", "post", "put", "delete", "patch", "head", "options"];

/// Parse the expanded step payload into a typed request.
pub fn parse_http_request(expanded: &Value) -> Result<HttpStepRequest> {
    let m = expanded
        .as_object()
        .ok_or_else(|| Error::Build(format!("invalid http request: {expanded}")))?;
    if m.len() != 1 {
        return Err(Error::Build(format!(
            "http request needs exactly one path, found {}",
            m.len()
        )));
    }
    let (path, spec) = m.iter().next().expect("len checked above");
    if !path.starts_with('/') {
        return Err(Error::Build(format!("http path must start with '/': {path}")));
    }

    let spec = spec
        .as_object()
        .ok_or_else(|| Error::Build(format!("invalid http request on {path}: {spec}")))?;
    if spec.len() != 1 {
        return Err(Error::Build(format!(
            "http request on {path} needs exactly one method, found {}",
            spec.len()
        )));
    }
    let (method, detail) = spec.iter().next().expect("len checked above");
    if !METHODS.contains(&method.to_lowercase().as_str()) {
        return Err(Error::Build(format!("unknown http method: {method}")));
    }

    let mut req = HttpStepRequest {
        path: path.clone(),
        method: method.clone(),
        headers: Vec::new(),
        query: Vec::new(),
        body: None,
    };
    match detail {
        Value::Null => {}
        Value::Object(detail) => {
            for (k, v) in detail {
                match k.as_str() {
                    "headers" => req.headers = string_pairs(v, "headers")?,
                    "query" => req.query = string_pairs(v, "query")?,
                    "body" => {
                        if !v.is_null() {
                            req.body = Some(v.clone());
                        }
                    }
                    other => {
                        return Err(Error::Build(format!("unknown http request field: {other}")))
                    }
                }
            }
        }
        other => {
            return Err(Error::Build(format!(
                "invalid http request detail on {path}: {other}"
            )))
        }
    }
    Ok(req)
}

fn string_pairs(v: &Value, what: &str) -> Result<Vec<(String, String)>> {
    let m = v
        .as_object()
        .ok_or_else(|| Error::Build(format!("http {what} must be a mapping: {v}")))?;
    let mut pairs = Vec::new();
    for (k, v) in m {
        let v = match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(Error::Build(format!("http {what} value: {other}"))),
        };
        pairs.push((k.clone(), v));
    }
    Ok(pairs)
}
