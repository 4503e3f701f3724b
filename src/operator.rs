//! Operator: the executing interpretation of one runbook.
//!
//! Construction applies options to a book, validates runner keys, and
//! builds typed steps. `run` drives the steps through guards, loops and
//! post-hooks (dump, then bind, then test), recording one frame per step
//! into the store and reporting lifecycle through the capture fan-out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::book::Book;
use crate::capture::{Capturer, Capturers, Debugger};
use crate::errors::{Error, Result};
use crate::expr::{self, Env};
use crate::loops::{self, DEFAULT_COUNT};
use crate::profile::Profiler;
use crate::runner::{
    parse_db_query, parse_exec_command, parse_grpc_request, parse_http_request, run_dump,
    run_test, DbRunner, ExecRunner, GrpcRunner, HttpRunner,
};
use crate::step::{build_step, Dispatch, IncludeConfig, RunnerKeys, Step};
use crate::store::{default_funcs, FuncMap, NativeFunc, Store};

/// Includes nested deeper than this fail deterministically (cycle guard).
pub const MAX_INCLUDE_DEPTH: usize = 10;

/// Before/after hook run around the step loop.
pub type Hook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Options applied to a book when building an operator (and, for the
/// batch loader, to every book it loads).
#[derive(Clone, Default)]
pub struct Options {
    pub(crate) book_path: Option<PathBuf>,
    pub(crate) book_src: Option<String>,
    pub(crate) vars: Map<String, Value>,
    pub(crate) funcs: FuncMap,
    pub(crate) debug: bool,
    pub(crate) profile: bool,
    pub(crate) interval: Duration,
    pub(crate) fail_fast: bool,
    pub(crate) skip_test: bool,
    pub(crate) skip_included: bool,
    pub(crate) included: bool,
    pub(crate) run_match: Option<Regex>,
    pub(crate) shard: Option<(usize, usize)>,
    pub(crate) sample: Option<usize>,
    pub(crate) seed: Option<u64>,
    pub(crate) before_hooks: Vec<Hook>,
    pub(crate) after_hooks: Vec<Hook>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the runbook from a file.
    pub fn book(mut self, path: impl Into<PathBuf>) -> Self {
        self.book_path = Some(path.into());
        self
    }

    /// Parse the runbook from YAML source (no backing file).
    pub fn from_yaml(mut self, src: impl Into<String>) -> Self {
        self.book_src = Some(src.into());
        self
    }

    /// Override or add a variable.
    pub fn var(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Register an expression helper.
    pub fn func(mut self, name: impl Into<String>, f: NativeFunc) -> Self {
        self.funcs.insert(name.into(), f);
        self
    }

    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }

    pub fn profile(mut self, on: bool) -> Self {
        self.profile = on;
        self
    }

    /// Sleep between steps.
    pub fn interval(mut self, d: Duration) -> Self {
        self.interval = d;
        self
    }

    /// Abort the whole batch on this operator's failure.
    pub fn fail_fast(mut self, on: bool) -> Self {
        self.fail_fast = on;
        self
    }

    /// Skip `test:` hooks (frames are still recorded).
    pub fn skip_test(mut self, on: bool) -> Self {
        self.skip_test = on;
        self
    }

    /// Drop books from a batch that are reachable through includes.
    pub fn skip_included(mut self, on: bool) -> Self {
        self.skip_included = on;
        self
    }

    /// Filter batch books by path.
    pub fn run_match(mut self, pattern: &str) -> Result<Self> {
        self.run_match =
            Some(Regex::new(pattern).map_err(|e| {
                Error::Build(format!("invalid run filter {pattern:?}: {e}"))
            })?);
        Ok(self)
    }

    /// Keep only operators where `index % n == i`.
    pub fn shard(mut self, n: usize, i: usize) -> Self {
        self.shard = Some((n, i));
        self
    }

    /// Uniformly sample this many operators from the batch.
    pub fn sample(mut self, n: usize) -> Self {
        self.sample = Some(n);
        self
    }

    /// Seed for sampling, for reproducible selections.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn before(mut self, hook: Hook) -> Self {
        self.before_hooks.push(hook);
        self
    }

    pub fn after(mut self, hook: Hook) -> Self {
        self.after_hooks.push(hook);
        self
    }
}

/// Context handed to an include's child operator.
pub(crate) struct Inherited {
    http: HashMap<String, Arc<HttpRunner>>,
    db: HashMap<String, Arc<DbRunner>>,
    grpc: HashMap<String, Arc<GrpcRunner>>,
    parent_ids: Vec<String>,
    bind_vars: Map<String, Value>,
    depth: usize,
}

pub struct Operator {
    id: String,
    desc: String,
    book_path: String,
    root: PathBuf,
    http_runners: HashMap<String, Arc<HttpRunner>>,
    db_runners: HashMap<String, Arc<DbRunner>>,
    grpc_runners: HashMap<String, Arc<GrpcRunner>>,
    exec_runner: ExecRunner,
    steps: Vec<Step>,
    store: Store,
    if_cond: Option<String>,
    use_map: bool,
    interval: Duration,
    fail_fast: bool,
    skip_test: bool,
    skipped: bool,
    capturers: Capturers,
    before_hooks: Vec<Hook>,
    after_hooks: Vec<Hook>,
    profiler: Profiler,
    parent_ids: Vec<String>,
    include_depth: usize,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("book_path", &self.book_path)
            .finish()
    }
}

const RESERVED_RUNNER_KEYS: [&str; 9] = [
    "if", "desc", "loop", "retry", "test", "dump", "bind", "exec", "include",
];

impl Operator {
    pub fn new(opts: Options) -> Result<Self> {
        let book = match (&opts.book_path, &opts.book_src) {
            (Some(path), _) => Book::load(path)?,
            (None, Some(src)) => Book::parse(src, None)?,
            (None, None) => return Err(Error::Build("no runbook given".into())),
        };
        Self::from_book(book, &opts, None)
    }

    pub(crate) fn from_book(
        book: Book,
        opts: &Options,
        inherited: Option<Inherited>,
    ) -> Result<Self> {
        let id = book.operator_id();
        let root = book.root()?;
        let book_path = book.display_path();

        let mut http_runners: HashMap<String, Arc<HttpRunner>> = HashMap::new();
        let mut db_runners: HashMap<String, Arc<DbRunner>> = HashMap::new();
        let mut grpc_runners: HashMap<String, Arc<GrpcRunner>> = HashMap::new();

        let mut seen_keys = std::collections::HashSet::new();
        for (key, config) in &book.runners {
            if RESERVED_RUNNER_KEYS.contains(&key.as_str()) {
                return Err(Error::Build(format!("reserved runner key: {key}")));
            }
            if !seen_keys.insert(key.clone()) {
                return Err(Error::DuplicateRunnerKey(key.clone()));
            }
            match classify_runner(config) {
                RunnerKind::Http => {
                    http_runners.insert(key.clone(), Arc::new(HttpRunner::new(key, config)?));
                }
                RunnerKind::Db => {
                    db_runners.insert(key.clone(), Arc::new(DbRunner::new(key, config)?));
                }
                RunnerKind::Grpc => {
                    grpc_runners.insert(key.clone(), Arc::new(GrpcRunner::new(key, config, &root)?));
                }
                RunnerKind::Unknown => {
                    return Err(Error::Build(format!(
                        "runner {key}: unsupported DSN or config: {config}"
                    )));
                }
            }
        }

        let (parent_ids, bind_vars, include_depth) = match &inherited {
            Some(inh) => (inh.parent_ids.clone(), Some(inh.bind_vars.clone()), inh.depth),
            None => (Vec::new(), None, 0),
        };
        if let Some(inh) = inherited {
            // Parent runners win on key collision, replacing a child
            // declaration of any kind.
            for (k, v) in inh.http {
                db_runners.remove(&k);
                grpc_runners.remove(&k);
                http_runners.insert(k, v);
            }
            for (k, v) in inh.db {
                http_runners.remove(&k);
                grpc_runners.remove(&k);
                db_runners.insert(k, v);
            }
            for (k, v) in inh.grpc {
                http_runners.remove(&k);
                db_runners.remove(&k);
                grpc_runners.insert(k, v);
            }
        }

        let runner_keys = RunnerKeys {
            http: http_runners.keys().cloned().collect(),
            db: db_runners.keys().cloned().collect(),
            grpc: grpc_runners.keys().cloned().collect(),
        };

        let mut steps = Vec::with_capacity(book.raw_steps.len());
        for (key, raw) in &book.raw_steps {
            steps.push(build_step(key, raw, &runner_keys)?);
        }

        let mut vars = book.vars.clone();
        for (k, v) in &opts.vars {
            vars.insert(k.clone(), v.clone());
        }
        let mut funcs = default_funcs();
        for (k, f) in &opts.funcs {
            funcs.insert(k.clone(), f.clone());
        }

        let step_keys: Vec<String> = steps.iter().map(|s| s.key.clone()).collect();
        let mut store = Store::new(vars, funcs, step_keys, book.use_map, opts.included);
        if let Some(parent_binds) = bind_vars {
            store.inherit_bind_vars(&parent_binds);
        }

        let mut capturers = Capturers::new();
        if opts.debug {
            capturers.push(Box::new(Debugger::stderr()));
        }

        Ok(Self {
            id,
            desc: book.desc.clone(),
            book_path,
            root,
            http_runners,
            db_runners,
            grpc_runners,
            exec_runner: ExecRunner,
            steps,
            store,
            if_cond: book.if_cond.clone(),
            use_map: book.use_map,
            interval: opts.interval,
            fail_fast: opts.fail_fast,
            skip_test: opts.skip_test,
            skipped: false,
            capturers,
            before_hooks: opts.before_hooks.clone(),
            after_hooks: opts.after_hooks.clone(),
            profiler: Profiler::new(opts.profile),
            parent_ids,
            include_depth,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn book_path(&self) -> &str {
        &self.book_path
    }

    pub fn skipped(&self) -> bool {
        self.skipped
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// The recorded frames: an array (list mode) or object (map mode).
    pub fn frames(&self) -> Value {
        self.store.frames_value()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn append_capturer(&mut self, capturer: Box<dyn Capturer>) {
        self.capturers.push(capturer);
    }

    /// Paths reachable through this operator's include steps.
    pub fn include_paths(&self) -> Vec<PathBuf> {
        self.steps
            .iter()
            .filter_map(|s| match &s.dispatch {
                Some(Dispatch::Include(cfg)) => Some(self.root.join(&cfg.path)),
                _ => None,
            })
            .collect()
    }

    /// Breadcrumb from the root operator down to this one.
    pub fn ids(&self) -> Vec<String> {
        let mut ids = self.parent_ids.clone();
        ids.push(self.id.clone());
        ids
    }

    fn step_ids(&self, step: &Step) -> Vec<String> {
        let mut ids = self.ids();
        ids.push(step.key.clone());
        ids
    }

    fn step_name(&self, idx: usize) -> String {
        let suffix = self
            .store
            .loop_index
            .map(|j| format!(".loop[{j}]"))
            .unwrap_or_default();
        if self.use_map {
            format!("'{}'.steps.{}{}", self.desc, self.steps[idx].key, suffix)
        } else {
            format!("'{}'.steps[{idx}]{}", self.desc, suffix)
        }
    }

    fn env(&self) -> Env<'_> {
        Env::new(self.store.snapshot(), self.store.funcs())
    }

    fn record(&mut self, frame: Value) {
        self.store.record(frame);
    }

    fn close(&mut self) {
        for runner in self.grpc_runners.values() {
            runner.close();
            self.capturers.grpc_client_close();
        }
    }

    /// Run the whole book: lifecycle captures, steps, runner teardown.
    /// Exactly one of success/skipped/failed is reported.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        let ids = self.ids();
        self.profiler.enter(&ids);
        self.capturers.start(&ids, &self.book_path, &self.desc);

        let result = self
            .run_internal(cancel)
            .await
            .map_err(|e| e.at_operator(self.id.clone()));

        match &result {
            Err(e) => self.capturers.failed(&ids, &self.book_path, &self.desc, e),
            Ok(()) if self.skipped => self.capturers.skipped(&ids, &self.book_path, &self.desc),
            Ok(()) => self.capturers.success(&ids, &self.book_path, &self.desc),
        }
        self.capturers.end(&ids, &self.book_path, &self.desc);
        self.close();
        self.profiler.exit(&ids);
        result
    }

    async fn run_internal(&mut self, cancel: &CancellationToken) -> Result<()> {
        if let Some(cond) = self.if_cond.clone() {
            let ok = {
                let env = self.env();
                expr::eval_cond(&cond, &env)?
            };
            if !ok {
                debug!(book = %self.desc, "skip: top-level condition is false");
                self.skipped = true;
                return Ok(());
            }
        }

        let before = self.before_hooks.clone();
        for hook in &before {
            hook()?;
        }

        for idx in 0..self.steps.len() {
            if idx != 0 {
                loops::wait(self.interval, cancel).await?;
            }
            self.run_step(idx, cancel).await?;
        }

        let after = self.after_hooks.clone();
        for hook in &after {
            hook()?;
        }
        Ok(())
    }

    async fn run_step(&mut self, idx: usize, cancel: &CancellationToken) -> Result<()> {
        let step = self.steps[idx].clone();
        let ids = self.step_ids(&step);
        self.capturers.set_current_ids(&ids);
        self.profiler.enter(&ids);
        let result = self.run_step_guarded(idx, &step, cancel).await;
        let label = if step.desc.is_empty() {
            &step.key
        } else {
            &step.desc
        };
        match &result {
            Err(e) => self.capturers.failed(&ids, &self.book_path, label, e),
            Ok(false) => self.capturers.skipped(&ids, &self.book_path, label),
            Ok(true) => self.capturers.success(&ids, &self.book_path, label),
        }
        self.profiler.exit(&ids);
        result.map(|_| ())
    }

    /// Returns false when the step was skipped by its guard.
    async fn run_step_guarded(
        &mut self,
        idx: usize,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if let Some(cond) = &step.if_cond {
            let ok = {
                let env = self.env();
                expr::eval_cond(cond, &env)
            }
            .map_err(|e| e.at_step(self.step_name(idx)))?;
            if !ok {
                debug!(step = %self.step_name(idx), "skip: condition is false");
                self.record(Value::Null);
                return Ok(false);
            }
        }

        match step.loop_cfg.clone() {
            Some(lp) => {
                let count = match &lp.count {
                    Some(src) => {
                        let env = self.env();
                        expr::eval_count(src, &env)
                            .map_err(|e| e.at_step(self.step_name(idx)))?
                    }
                    None => DEFAULT_COUNT,
                };
                let result = self.run_loop(idx, step, &lp, count, cancel).await;
                self.store.loop_index = None;
                result.map(|_| true)
            }
            None => self.run_step_body(idx, step, cancel).await.map(|_| true),
        }
    }

    async fn run_loop(
        &mut self,
        idx: usize,
        step: &Step,
        lp: &crate::loops::Loop,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut success = lp.until.is_none();
        let mut tree = String::new();
        let mut j = 0;
        while j < count {
            loops::wait(lp.delay(j), cancel).await?;
            self.store.loop_index = Some(j);
            self.run_step_body(idx, step, cancel).await?;
            if let Some(until) = &lp.until {
                let outcome = {
                    let env = self.env();
                    expr::build_tree(until, &env).and_then(|t| {
                        let ok = expr::eval_cond(until, &env)?;
                        Ok((t, ok))
                    })
                };
                let (t, ok) = outcome.map_err(|e| e.at_step(self.step_name(idx)))?;
                debug!(step = %self.step_name(idx), "loop condition:\n{t}");
                tree = t;
                if ok {
                    success = true;
                    break;
                }
            }
            j += 1;
        }
        if !success {
            let condition = lp.until.clone().unwrap_or_default();
            self.store.loop_index = None;
            return Err(Error::LoopExhausted {
                condition,
                count,
                schedule: lp.schedule_desc(count),
                tree,
            }
            .at_step(self.step_name(idx)));
        }
        Ok(())
    }

    async fn run_step_body(
        &mut self,
        idx: usize,
        step: &Step,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let step_name = self.step_name(idx);
        let mut ran = false;

        match &step.dispatch {
            Some(Dispatch::Http { runner, request }) => {
                debug!(step = %step_name, runner = %runner, "run http step");
                let expanded = self
                    .expand(request)
                    .map_err(|e| e.at_step(step_name.clone()))?;
                let req =
                    parse_http_request(&expanded).map_err(|e| e.at_step(step_name.clone()))?;
                let r = self
                    .http_runners
                    .get(runner)
                    .cloned()
                    .ok_or_else(|| Error::UnknownRunnerKey(runner.clone()))?;
                let frame = r
                    .run(&req, &mut self.capturers, cancel)
                    .await
                    .map_err(|e| e.at_step(step_name.clone()))?;
                self.record(frame);
                ran = true;
            }
            Some(Dispatch::Db { runner, query }) => {
                debug!(step = %step_name, runner = %runner, "run db step");
                let expanded = self
                    .expand(query)
                    .map_err(|e| e.at_step(step_name.clone()))?;
                let q = parse_db_query(&expanded).map_err(|e| e.at_step(step_name.clone()))?;
                let r = self
                    .db_runners
                    .get(runner)
                    .cloned()
                    .ok_or_else(|| Error::UnknownRunnerKey(runner.clone()))?;
                let frame = r
                    .run(&q, &mut self.capturers, cancel)
                    .await
                    .map_err(|e| e.at_step(step_name.clone()))?;
                self.record(frame);
                ran = true;
            }
            Some(Dispatch::Grpc { runner, request }) => {
                debug!(step = %step_name, runner = %runner, "run gRPC step");
                let expanded = self
                    .expand(request)
                    .map_err(|e| e.at_step(step_name.clone()))?;
                let req =
                    parse_grpc_request(&expanded).map_err(|e| e.at_step(step_name.clone()))?;
                let r = self
                    .grpc_runners
                    .get(runner)
                    .cloned()
                    .ok_or_else(|| Error::UnknownRunnerKey(runner.clone()))?;
                let frame = r
                    .run(&req, &mut self.capturers, cancel)
                    .await
                    .map_err(|e| e.at_step(step_name.clone()))?;
                self.record(frame);
                ran = true;
            }
            Some(Dispatch::Exec { command }) => {
                debug!(step = %step_name, "run exec step");
                let expanded = self
                    .expand(command)
                    .map_err(|e| e.at_step(step_name.clone()))?;
                let cmd =
                    parse_exec_command(&expanded).map_err(|e| e.at_step(step_name.clone()))?;
                let frame = self
                    .exec_runner
                    .run(&cmd, &mut self.capturers, cancel)
                    .await
                    .map_err(|e| e.at_step(step_name.clone()))?;
                self.record(frame);
                ran = true;
            }
            Some(Dispatch::Include(cfg)) => {
                debug!(step = %step_name, path = %cfg.path, "run include step");
                let ids = self.step_ids(step);
                self.run_include(cfg, &ids, cancel)
                    .await
                    .map_err(|e| e.at_step(step_name.clone()))?;
                ran = true;
            }
            None => {}
        }

        if let Some(dump) = &step.dump_expr {
            debug!(step = %step_name, "run dump hook");
            {
                let env = self.env();
                run_dump(dump, &env, &mut std::io::stdout())
            }
            .map_err(|e| e.at_step(step_name.clone()))?;
            if !ran {
                self.record(Value::Null);
                ran = true;
            }
        }

        if !step.bind_exprs.is_empty() {
            debug!(step = %step_name, "run bind hook");
            let values: Vec<(String, Value)> = {
                let env = self.env();
                step.bind_exprs
                    .iter()
                    .map(|(name, src)| Ok((name.clone(), expr::eval(src, &env)?)))
                    .collect::<Result<_>>()
            }
            .map_err(|e: Error| e.at_step(step_name.clone()))?;
            for (name, value) in values {
                self.store
                    .bind(&name, value)
                    .map_err(|e| e.at_step(step_name.clone()))?;
            }
            if !ran {
                self.record(Value::Null);
                ran = true;
            }
        }

        if let Some(cond) = &step.test_cond {
            if self.skip_test {
                debug!(step = %step_name, "skip test hook");
                if !ran {
                    self.record(Value::Null);
                }
                return Ok(());
            }
            debug!(step = %step_name, "run test hook");
            {
                let env = self.env();
                run_test(cond, &env)
            }
            .map_err(|e| e.at_step(step_name.clone()))?;
            if !ran {
                self.record(Value::Null);
                ran = true;
            }
        }

        if !ran {
            return Err(Error::Build(format!("no runner ran on {step_name}")));
        }
        Ok(())
    }

    async fn run_include(
        &mut self,
        cfg: &IncludeConfig,
        step_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(Error::Build(format!(
                "include depth exceeds {MAX_INCLUDE_DEPTH} (include cycle?): {}",
                cfg.path
            )));
        }
        let path = self.root.join(&cfg.path);
        let book = Book::load(&path)?;

        // Include vars are expanded against the parent snapshot and
        // replace same-named child vars.
        let include_vars: Vec<(String, Value)> = {
            let env = self.env();
            cfg.vars
                .iter()
                .map(|(k, v)| Ok((k.clone(), expr::expand(v, &env)?)))
                .collect::<Result<_>>()?
        };

        let mut child_opts = Options::new()
            .skip_test(self.skip_test || cfg.skip_test)
            .interval(self.interval);
        child_opts.included = true;
        child_opts.funcs = self.store.funcs().clone();
        for (k, v) in include_vars {
            child_opts.vars.insert(k, v);
        }

        let inherited = Inherited {
            http: self.http_runners.clone(),
            db: self.db_runners.clone(),
            grpc: self.grpc_runners.clone(),
            parent_ids: step_ids.to_vec(),
            bind_vars: self.store.bind_vars().clone(),
            depth: self.include_depth + 1,
        };

        let mut child = Operator::from_book(book, &child_opts, Some(inherited))?;
        // Lend the capture fan-out to the child for the duration of the
        // nested run.
        child.capturers = std::mem::take(&mut self.capturers);
        let nested: std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + '_>> =
            Box::pin(child.run_internal(cancel));
        let result = nested.await;
        self.capturers = std::mem::take(&mut child.capturers);
        result?;

        self.record(json!({
            "steps": child.store.frames_value(),
            "vars": Value::Object(child.store.vars().clone()),
        }));
        Ok(())
    }

    fn expand(&self, v: &Value) -> Result<Value> {
        let env = self.env();
        expr::expand(v, &env)
    }
}

enum RunnerKind {
    Http,
    Db,
    Grpc,
    Unknown,
}

fn classify_runner(config: &Value) -> RunnerKind {
    match config {
        Value::String(dsn) => {
            if dsn.starts_with("http://") || dsn.starts_with("https://") {
                RunnerKind::Http
            } else if dsn.starts_with("grpc://") {
                RunnerKind::Grpc
            } else if dsn.starts_with("postgres://")
                || dsn.starts_with("postgresql://")
                || dsn.starts_with("mysql://")
                || dsn.starts_with("sqlite:")
            {
                RunnerKind::Db
            } else {
                RunnerKind::Unknown
            }
        }
        Value::Object(m) => {
            if m.contains_key("url") {
                RunnerKind::Http
            } else if m.contains_key("addr") {
                RunnerKind::Grpc
            } else {
                RunnerKind::Unknown
            }
        }
        _ => RunnerKind::Unknown,
    }
}
