//! Opt-in wall-clock profiling of operators, steps and hooks.

use std::io::Write;
use std::time::Instant;

use serde::Serialize;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub ids: Vec<String>,
    pub elapsed_ms: u64,
}

/// Records named spans when enabled; every call is a no-op otherwise.
#[derive(Debug)]
pub struct Profiler {
    enabled: bool,
    open: Vec<(Vec<String>, Instant)>,
    spans: Vec<SpanRecord>,
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            open: Vec::new(),
            spans: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn enter(&mut self, ids: &[String]) {
        if self.enabled {
            self.open.push((ids.to_vec(), Instant::now()));
        }
    }

    pub fn exit(&mut self, ids: &[String]) {
        if !self.enabled {
            return;
        }
        if let Some(pos) = self.open.iter().rposition(|(open, _)| open == ids) {
            let (ids, started) = self.open.remove(pos);
            self.spans.push(SpanRecord {
                ids,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    pub fn records(&self) -> &[SpanRecord] {
        &self.spans
    }

    pub fn dump(&self, out: &mut dyn Write) -> Result<()> {
        if !self.enabled {
            return Err(Error::Build("no profile was recorded".into()));
        }
        let rendered = serde_json::to_string_pretty(&self.spans)
            .map_err(|e| Error::Build(format!("cannot serialize profile: {e}")))?;
        writeln!(out, "{rendered}")?;
        Ok(())
    }
}
