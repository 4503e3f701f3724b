//! CLI reporter observer: one line per scenario, optional per-step lines.

use std::io::Write;

use colored::Colorize;

use super::{shorten_path, Capturer};
use crate::errors::Error;

/// Prints `desc (path) ... ok|skip|<err>` per top-level scenario. With
/// `verbose`, nested step lifecycle events are printed indented.
pub struct CmdOut {
    out: Box<dyn Write + Send>,
    verbose: bool,
}

impl CmdOut {
    pub fn new(out: Box<dyn Write + Send>, verbose: bool) -> Self {
        Self { out, verbose }
    }

    pub fn stderr(verbose: bool) -> Self {
        Self::new(Box::new(std::io::stderr()), verbose)
    }

    fn line(&mut self, ids: &[String], book_path: &str, desc: &str, outcome: &str) {
        if ids.len() == 1 {
            let _ = writeln!(
                self.out,
                "{} ({}) ... {}",
                desc,
                shorten_path(book_path),
                outcome
            );
        } else if self.verbose {
            let indent = "  ".repeat(ids.len() - 1);
            let _ = writeln!(self.out, "{indent}{desc} ... {outcome}");
        }
    }
}

impl Capturer for CmdOut {
    fn success(&mut self, ids: &[String], book_path: &str, desc: &str) {
        self.line(ids, book_path, desc, &"ok".green().to_string());
    }

    fn skipped(&mut self, ids: &[String], book_path: &str, desc: &str) {
        self.line(ids, book_path, desc, &"skip".yellow().to_string());
    }

    fn failed(&mut self, ids: &[String], book_path: &str, desc: &str, err: &Error) {
        let msg = err.to_string().red().to_string();
        self.line(ids, book_path, desc, &msg);
    }
}
