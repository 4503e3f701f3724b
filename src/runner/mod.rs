//! Protocol runners.
//!
//! A runner is a protocol client bound to an author key. Each call takes
//! a typed request, fires its capture hooks around the wire interaction,
//! honors cancellation, and returns exactly one frame for the store (or
//! fails).

mod db;
mod exec;
mod grpc;
mod hooks;
mod http;

pub use db::{parse_db_query, DbQuery, DbRunner};
pub use exec::{parse_exec_command, ExecCommand, ExecRunner};
pub use grpc::{parse_grpc_request, GrpcRequest, GrpcRunner};
pub use hooks::{run_dump, run_test};
pub use http::{parse_http_request, HttpRunner, HttpStepRequest};
