//! Dynamic unary gRPC runner.
//!
//! Messages are encoded and decoded at runtime through a file descriptor
//! set named in the runner config (`protos:`), so no generated client
//! code is required. Connections are opened lazily and closed by the
//! owning operator on teardown.

use std::path::Path;
use std::sync::Mutex;

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::metadata::{KeyAndValueRef, MetadataKey, MetadataValue};
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::Status;

use crate::capture::Capturers;
use crate::errors::{Error, Result};

pub struct GrpcRunner {
    key: String,
    target: String,
    pool: Option<DescriptorPool>,
    channel: Mutex<Option<Channel>>,
}

impl std::fmt::Debug for GrpcRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcRunner")
            .field("key", &self.key)
            .field("target", &self.target)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrpcRequest {
    pub service: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub message: Value,
}

/// Parse the expanded step payload: `{service, method, headers?, message?}`.
pub fn parse_grpc_request(expanded: &Value) -> Result<GrpcRequest> {
    let m = expanded
        .as_object()
        .ok_or_else(|| Error::Build(format!("invalid gRPC request: {expanded}")))?;
    let service = m
        .get("service")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Build(format!("gRPC step needs a service: {expanded}")))?
        .to_string();
    let method = m
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Build(format!("gRPC step needs a method: {expanded}")))?
        .to_string();
    let headers = match m.get("headers") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(h)) => h
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.clone(), s.clone())),
                other => Err(Error::Build(format!("invalid gRPC header value: {other}"))),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => return Err(Error::Build(format!("invalid gRPC headers: {other}"))),
    };
    let message = m.get("message").cloned().unwrap_or(json!({}));
    for key in m.keys() {
        if !matches!(key.as_str(), "service" | "method" | "headers" | "message") {
            return Err(Error::Build(format!("unknown gRPC request field: {key}")));
        }
    }
    Ok(GrpcRequest {
        service,
        method,
        headers,
        message,
    })
}

impl GrpcRunner {
    /// `config` is a DSN string (`grpc://host:port`) or an object
    /// `{addr, tls?, protos}`. Descriptor set paths resolve against the
    /// book root. Dynamic calls need `protos`; a bare DSN builds a runner
    /// that fails at call time.
    pub fn new(key: &str, config: &Value, root: &Path) -> Result<Self> {
        let (addr, tls, protos) = match config {
            Value::String(dsn) => {
                let addr = dsn
                    .strip_prefix("grpc://")
                    .ok_or_else(|| Error::Build(format!("runner {key}: not a gRPC DSN: {dsn}")))?;
                (addr.to_string(), false, Vec::new())
            }
            Value::Object(m) => {
                let addr = m
                    .get("addr")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Build(format!("runner {key}: missing addr")))?
                    .to_string();
                let tls = m.get("tls").and_then(Value::as_bool).unwrap_or(false);
                let protos = match m.get("protos") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::String(p)) => vec![p.clone()],
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|p| {
                            p.as_str().map(str::to_string).ok_or_else(|| {
                                Error::Build(format!("runner {key}: invalid protos entry: {p}"))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                    Some(other) => {
                        return Err(Error::Build(format!(
                            "runner {key}: invalid protos: {other}"
                        )))
                    }
                };
                (addr, tls, protos)
            }
            other => {
                return Err(Error::Build(format!(
                    "runner {key}: invalid gRPC config: {other}"
                )))
            }
        };

        let pool = if protos.is_empty() {
            None
        } else {
            let mut pool = DescriptorPool::new();
            for p in &protos {
                let path = root.join(p);
                let bytes = std::fs::read(&path).map_err(|e| {
                    Error::Build(format!(
                        "runner {key}: cannot read descriptor set {}: {e}",
                        path.display()
                    ))
                })?;
                pool.decode_file_descriptor_set(bytes.as_slice())
                    .map_err(|e| {
                        Error::Build(format!(
                            "runner {key}: invalid descriptor set {}: {e}",
                            path.display()
                        ))
                    })?;
            }
            Some(pool)
        };

        let scheme = if tls { "https" } else { "http" };
        Ok(Self {
            key: key.to_string(),
            target: format!("{scheme}://{addr}"),
            pool,
            channel: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn method_descriptor(&self, service: &str, method: &str) -> Result<MethodDescriptor> {
        let pool = self.pool.as_ref().ok_or_else(|| Error::Build(format!(
            "runner {}: dynamic gRPC calls need a descriptor set (set protos in the runner config)",
            self.key
        )))?;
        let svc = pool.get_service_by_name(service).ok_or_else(|| {
            Error::Build(format!("runner {}: unknown service: {service}", self.key))
        })?;
        let method = svc.methods().find(|m| m.name() == method).ok_or_else(|| {
            Error::Build(format!(
                "runner {}: unknown method: {service}/{method}",
                self.key
            ))
        });
        method
    }

    fn channel(&self) -> Result<Channel> {
        let mut guard = self.channel.lock().expect("channel lock poisoned");
        if guard.is_none() {
            let mut endpoint = Endpoint::from_shared(self.target.clone())
                .map_err(|e| Error::Build(format!("runner {}: bad target: {e}", self.key)))?;
            if self.target.starts_with("https://") {
                endpoint = endpoint
                    .tls_config(ClientTlsConfig::new())
                    .map_err(|e| Error::Build(format!("runner {}: tls: {e}", self.key)))?;
            }
            *guard = Some(endpoint.connect_lazy());
        }
        Ok(guard.as_ref().expect("channel initialized above").clone())
    }

    /// Drop the connection. The operator calls this on teardown.
    pub fn close(&self) {
        self.channel.lock().expect("channel lock poisoned").take();
    }

    pub async fn run(
        &self,
        req: &GrpcRequest,
        caps: &mut Capturers,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let method = self.method_descriptor(&req.service, &req.method)?;
        if method.is_client_streaming() || method.is_server_streaming() {
            return Err(Error::Build(format!(
                "runner {}: only unary methods are supported: {}/{}",
                self.key, req.service, req.method
            )));
        }

        let msg_json = req.message.to_string();
        let mut deserializer = serde_json::Deserializer::from_str(&msg_json);
        let message =
            DynamicMessage::deserialize(method.input(), &mut deserializer).map_err(|e| {
                Error::Build(format!("invalid gRPC message for {}: {e}", req.method))
            })?;

        caps.grpc_start(&req.service, &req.method);
        caps.grpc_request_headers(&pairs_value(&req.headers));
        caps.grpc_request_message(&req.message);

        let mut request = tonic::Request::new(message);
        for (k, v) in &req.headers {
            let key = MetadataKey::from_bytes(k.to_lowercase().as_bytes())
                .map_err(|e| Error::Build(format!("invalid gRPC header {k:?}: {e}")))?;
            let value: MetadataValue<_> = v
                .parse()
                .map_err(|_| Error::Build(format!("invalid gRPC header value for {k:?}")))?;
            request.metadata_mut().insert(key, value);
        }

        let channel = self.channel()?;
        let mut client = tonic::client::Grpc::new(channel);
        let path_str = format!("/{}/{}", req.service, req.method);
        let path = http::uri::PathAndQuery::try_from(path_str.as_str())
            .map_err(|e| Error::Build(format!("invalid gRPC path: {e}")))?;
        let codec = DynamicCodec {
            output: method.output(),
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            ready = client.ready() => {
                ready.map_err(|e| Error::Runner { kind: "gRPC request", message: e.to_string() })?;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Canceled),
                    r = client.unary(request, path, codec) => r,
                }
            }
        };

        let res = match outcome {
            Ok(response) => {
                let headers = metadata_value(response.metadata());
                let message = serde_json::to_value(response.get_ref()).map_err(|e| {
                    Error::Runner {
                        kind: "gRPC request",
                        message: format!("cannot decode response: {e}"),
                    }
                })?;
                caps.grpc_response_status(tonic::Code::Ok as i32);
                caps.grpc_response_headers(&headers);
                caps.grpc_response_message(&message);
                caps.grpc_response_trailers(&json!({}));
                json!({
                    "status": tonic::Code::Ok as i32,
                    "headers": headers,
                    "message": message,
                })
            }
            Err(status) => {
                // A server-side status is an observation for assertions,
                // not a runner failure.
                let code = status.code() as i32;
                caps.grpc_response_status(code);
                caps.grpc_response_trailers(&metadata_value(status.metadata()));
                json!({
                    "status": code,
                    "headers": {},
                    "message": Value::Null,
                    "error": status.message(),
                })
            }
        };
        caps.grpc_end(&req.service, &req.method);

        Ok(json!({
            "req": {
                "service": req.service,
                "method": req.method,
                "headers": pairs_value(&req.headers),
                "message": req.message,
            },
            "res": res,
        }))
    }
}

fn pairs_value(pairs: &[(String, String)]) -> Value {
    let m: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.to_lowercase(), Value::String(v.clone())))
        .collect();
    Value::Object(m)
}

fn metadata_value(md: &tonic::metadata::MetadataMap) -> Value {
    let mut m = Map::new();
    for kv in md.iter() {
        if let KeyAndValueRef::Ascii(key, value) = kv {
            if let Ok(v) = value.to_str() {
                let entry = m
                    .entry(key.as_str().to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.push(Value::String(v.to_string()));
                }
            }
        }
    }
    Value::Object(m)
}

#[derive(Clone)]
struct DynamicCodec {
    output: MessageDescriptor,
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.output.clone())
    }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> std::result::Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(e.to_string()))
    }
}

struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        let msg = DynamicMessage::decode(self.0.clone(), src)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_payload() {
        let req = parse_grpc_request(&json!({
            "service": "greet.Greeter",
            "method": "Hello",
            "headers": {"authorization": "Bearer t"},
            "message": {"name": "alice"},
        }))
        .unwrap();
        assert_eq!(req.service, "greet.Greeter");
        assert_eq!(req.method, "Hello");
        assert_eq!(req.message, json!({"name": "alice"}));
    }

    #[test]
    fn message_defaults_to_empty_object() {
        let req =
            parse_grpc_request(&json!({"service": "s.S", "method": "M"})).unwrap();
        assert_eq!(req.message, json!({}));
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(parse_grpc_request(&json!({"method": "M"})).is_err());
        assert!(parse_grpc_request(&json!({"service": "s.S", "method": "M", "x": 1})).is_err());
    }

    #[test]
    fn dsn_and_config_forms() {
        let root = Path::new(".");
        let r = GrpcRunner::new("greq", &json!("grpc://localhost:50051"), root).unwrap();
        assert_eq!(r.target, "http://localhost:50051");
        assert!(r.pool.is_none());

        assert!(GrpcRunner::new("greq", &json!("http://x"), root).is_err());
        let r = GrpcRunner::new("greq", &json!({"addr": "h:1", "tls": true}), root).unwrap();
        assert_eq!(r.target, "https://h:1");
    }

    #[test]
    fn calls_without_descriptors_fail_fast() {
        let root = Path::new(".");
        let r = GrpcRunner::new("greq", &json!("grpc://localhost:50051"), root).unwrap();
        assert!(r.method_descriptor("a.B", "C").is_err());
    }

    #[test]
    fn missing_descriptor_file_is_a_build_error() {
        let root = Path::new(".");
        let err = GrpcRunner::new(
            "greq",
            &json!({"addr": "h:1", "protos": "missing.desc"}),
            root,
        )
        .unwrap_err();
        assert!(err.is_build());
    }
}
