//! Debug observer: prints every protocol interaction to a writer.

use std::io::Write;

use colored::Colorize;
use serde_json::Value;

use super::Capturer;

/// Attached automatically when an operator runs with `debug` enabled.
pub struct Debugger {
    out: Box<dyn Write + Send>,
}

impl Debugger {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    fn section(&mut self, title: &str, body: &str) {
        let _ = writeln!(self.out, "{}", format!("-----START {title}-----").cyan());
        let _ = writeln!(self.out, "{body}");
        let _ = writeln!(self.out, "{}", format!("-----END {title}-----").cyan());
    }

    fn pretty(v: &Value) -> String {
        serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
    }
}

impl Capturer for Debugger {
    fn http_request(&mut self, req: &Value) {
        let body = Self::pretty(req);
        self.section("HTTP REQUEST", &body);
    }

    fn http_response(&mut self, res: &Value) {
        let body = Self::pretty(res);
        self.section("HTTP RESPONSE", &body);
    }

    fn grpc_start(&mut self, service: &str, method: &str) {
        let _ = writeln!(self.out, "{}", format!("gRPC {service}/{method}").cyan());
    }

    fn grpc_request_message(&mut self, message: &Value) {
        let body = Self::pretty(message);
        self.section("gRPC REQUEST MESSAGE", &body);
    }

    fn grpc_response_status(&mut self, status: i32) {
        let _ = writeln!(self.out, "gRPC status: {status}");
    }

    fn grpc_response_message(&mut self, message: &Value) {
        let body = Self::pretty(message);
        self.section("gRPC RESPONSE MESSAGE", &body);
    }

    fn db_statement(&mut self, key: &str, stmt: &str) {
        let title = format!("QUERY ({key})");
        self.section(&title, stmt);
    }

    fn db_response(&mut self, key: &str, res: &Value) {
        let title = format!("QUERY RESULT ({key})");
        let body = Self::pretty(res);
        self.section(&title, &body);
    }

    fn exec_command(&mut self, command: &str) {
        self.section("COMMAND", command);
    }

    fn exec_stdin(&mut self, stdin: &str) {
        self.section("STDIN", stdin);
    }

    fn exec_stdout(&mut self, stdout: &str) {
        self.section("STDOUT", stdout);
    }

    fn exec_stderr(&mut self, stderr: &str) {
        self.section("STDERR", stderr);
    }
}
