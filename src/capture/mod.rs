//! Lifecycle and protocol observers.
//!
//! A `Capturer` receives lifecycle events (start/end/success/skipped/
//! failed) and protocol-level captures from runners. Every method has a
//! no-op default so observers implement only what they need and new hooks
//! never break existing ones. `Capturers` fans events out in registration
//! order.

mod cmdout;
mod debugger;

pub use cmdout::CmdOut;
pub use debugger::Debugger;

use serde_json::Value;

use crate::errors::Error;

/// Observer of operator lifecycle and protocol events.
///
/// `ids` is the hierarchical breadcrumb from the root operator down to the
/// current step; includes extend it with the child operator's ids.
#[allow(unused_variables)]
pub trait Capturer: Send {
    fn start(&mut self, ids: &[String], book_path: &str, desc: &str) {}
    fn end(&mut self, ids: &[String], book_path: &str, desc: &str) {}
    fn success(&mut self, ids: &[String], book_path: &str, desc: &str) {}
    fn skipped(&mut self, ids: &[String], book_path: &str, desc: &str) {}
    fn failed(&mut self, ids: &[String], book_path: &str, desc: &str, err: &Error) {}

    fn http_request(&mut self, req: &Value) {}
    fn http_response(&mut self, res: &Value) {}

    fn grpc_start(&mut self, service: &str, method: &str) {}
    fn grpc_request_headers(&mut self, headers: &Value) {}
    fn grpc_request_message(&mut self, message: &Value) {}
    fn grpc_response_status(&mut self, status: i32) {}
    fn grpc_response_headers(&mut self, headers: &Value) {}
    fn grpc_response_message(&mut self, message: &Value) {}
    fn grpc_response_trailers(&mut self, trailers: &Value) {}
    fn grpc_client_close(&mut self) {}
    fn grpc_end(&mut self, service: &str, method: &str) {}

    fn cdp_start(&mut self, key: &str) {}
    fn cdp_action(&mut self, action: &Value) {}
    fn cdp_response(&mut self, action: &Value, res: &Value) {}
    fn cdp_end(&mut self, key: &str) {}

    fn ssh_command(&mut self, command: &str) {}
    fn ssh_stdout(&mut self, stdout: &str) {}
    fn ssh_stderr(&mut self, stderr: &str) {}

    fn db_statement(&mut self, key: &str, stmt: &str) {}
    fn db_response(&mut self, key: &str, res: &Value) {}

    fn exec_command(&mut self, command: &str) {}
    fn exec_stdin(&mut self, stdin: &str) {}
    fn exec_stdout(&mut self, stdout: &str) {}
    fn exec_stderr(&mut self, stderr: &str) {}

    /// Set the breadcrumb of the step about to run.
    fn set_current_ids(&mut self, ids: &[String]) {}

    /// Validation errors collected by this observer, if any.
    fn errs(&self) -> Option<String> {
        None
    }
}

/// Ordered list of observers; every event is forwarded in registration
/// order.
#[derive(Default)]
pub struct Capturers {
    list: Vec<Box<dyn Capturer>>,
}

macro_rules! fan_out {
    ($( $name:ident ( $( $arg:ident : $ty:ty ),* ) );* $(;)?) => {
        $(
            pub fn $name(&mut self, $( $arg: $ty ),*) {
                for c in &mut self.list {
                    c.$name($( $arg ),*);
                }
            }
        )*
    };
}

impl Capturers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, capturer: Box<dyn Capturer>) {
        self.list.push(capturer);
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Aggregated validation errors across all observers.
    pub fn errs(&self) -> Vec<String> {
        self.list.iter().filter_map(|c| c.errs()).collect()
    }

    fan_out! {
        start(ids: &[String], book_path: &str, desc: &str);
        end(ids: &[String], book_path: &str, desc: &str);
        success(ids: &[String], book_path: &str, desc: &str);
        skipped(ids: &[String], book_path: &str, desc: &str);
        failed(ids: &[String], book_path: &str, desc: &str, err: &Error);
        http_request(req: &Value);
        http_response(res: &Value);
        grpc_start(service: &str, method: &str);
        grpc_request_headers(headers: &Value);
        grpc_request_message(message: &Value);
        grpc_response_status(status: i32);
        grpc_response_headers(headers: &Value);
        grpc_response_message(message: &Value);
        grpc_response_trailers(trailers: &Value);
        grpc_client_close();
        grpc_end(service: &str, method: &str);
        cdp_start(key: &str);
        cdp_action(action: &Value);
        cdp_response(action: &Value, res: &Value);
        cdp_end(key: &str);
        ssh_command(command: &str);
        ssh_stdout(stdout: &str);
        ssh_stderr(stderr: &str);
        db_statement(key: &str, stmt: &str);
        db_response(key: &str, res: &Value);
        exec_command(command: &str);
        exec_stdin(stdin: &str);
        exec_stdout(stdout: &str);
        exec_stderr(stderr: &str);
        set_current_ids(ids: &[String]);
    }
}

/// Shorten a book path for display: every directory component is reduced
/// to its first character.
pub fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    match parts.split_last() {
        Some((last, dirs)) if !dirs.is_empty() => {
            let mut shortened: Vec<String> = dirs
                .iter()
                .map(|d| d.chars().next().map(String::from).unwrap_or_default())
                .collect();
            shortened.push((*last).to_string());
            shortened.join("/")
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Capturer for Recorder {
        fn start(&mut self, _ids: &[String], _path: &str, desc: &str) {
            self.events.lock().unwrap().push(format!("start:{desc}"));
        }
        fn exec_stdout(&mut self, stdout: &str) {
            self.events.lock().unwrap().push(format!("stdout:{stdout}"));
        }
        fn errs(&self) -> Option<String> {
            Some("recorder saw something".into())
        }
    }

    #[test]
    fn fans_out_in_registration_order() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let mut caps = Capturers::new();
        caps.push(Box::new(Recorder {
            events: first.clone(),
        }));
        caps.push(Box::new(Recorder {
            events: second.clone(),
        }));

        caps.start(&["op".into()], "book.yml", "demo");
        caps.exec_stdout("hello");

        assert_eq!(
            *first.lock().unwrap(),
            vec!["start:demo".to_string(), "stdout:hello".to_string()]
        );
        assert_eq!(*first.lock().unwrap(), *second.lock().unwrap());
    }

    #[test]
    fn default_methods_are_noops() {
        struct Silent;
        impl Capturer for Silent {}
        let mut caps = Capturers::new();
        caps.push(Box::new(Silent));
        caps.success(&["op".into()], "book.yml", "demo");
        assert!(caps.errs().is_empty());
    }

    #[test]
    fn errs_aggregates() {
        let mut caps = Capturers::new();
        caps.push(Box::new(Recorder::default()));
        caps.push(Box::new(Recorder::default()));
        assert_eq!(caps.errs().len(), 2);
    }

    #[test]
    fn shortens_directories_to_initials() {
        assert_eq!(shorten_path("testdata/books/login.yml"), "t/b/login.yml");
        assert_eq!(shorten_path("login.yml"), "login.yml");
    }
}
