//! opsbook - declarative runbook scenario runner
//!
//! ## Architecture
//!
//! - `book`: runbook YAML model and loading
//! - `step`: raw step maps into typed steps (dispatch + post-hooks)
//! - `operator`: interpretation of one runbook (guards, loops, hooks)
//! - `batch`: loading and running many runbooks with tallies
//! - `store`: per-run observations, bind values, loop-index shadowing
//! - `expr`: expression engine (conditions, interpolation, trees)
//! - `runner`: protocol clients (HTTP, SQL, gRPC, exec) and post-hooks
//! - `capture`: lifecycle/protocol observers and the fan-out
//! - `loops`: retry/repeat controller with backoff
//! - `builder`: programmatic runbook construction (curl/exec steps)
//! - `fmt`: canonical runbook formatting
//! - `reportportal`: JUnit upload client
//! - `profile`: opt-in span timing
//! - `errors`: error kinds with breadcrumb wrapping

pub mod batch;
pub mod book;
pub mod builder;
pub mod capture;
pub mod errors;
pub mod expr;
pub mod fmt;
pub mod loops;
pub mod operator;
pub mod profile;
pub mod reportportal;
pub mod runner;
pub mod step;
pub mod store;

pub use batch::{load, Batch, BatchResult, RUN_MATCH_ENV};
pub use book::Book;
pub use builder::RunbookBuilder;
pub use capture::{Capturer, Capturers, CmdOut, Debugger};
pub use errors::{Error, Result};
pub use expr::Env;
pub use operator::{Operator, Options};
pub use store::Store;
