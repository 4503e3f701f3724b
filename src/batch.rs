//! Batch loading and sequential execution of many runbooks.
//!
//! `load` expands a path pattern, builds an operator per book, prunes
//! books already reachable through includes, filters by the run-match
//! regex, sorts deterministically, then shards and samples. `run_all`
//! executes sequentially and tallies outcomes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::operator::{Operator, Options};

/// Environment variable holding the run-filter regex.
pub const RUN_MATCH_ENV: &str = "OPSBOOK_RUN";

#[derive(Debug, Default)]
pub struct BatchResult {
    total: AtomicI64,
    success: AtomicI64,
    failure: AtomicI64,
    skipped: AtomicI64,
}

impl BatchResult {
    pub fn total(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn success(&self) -> i64 {
        self.success.load(Ordering::SeqCst)
    }

    pub fn failure(&self) -> i64 {
        self.failure.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> i64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn has_failure(&self) -> bool {
        self.failure() > 0
    }

    /// `N scenarios, M skipped, K failures` — green when clean, red
    /// otherwise.
    pub fn summary(&self) -> String {
        let scenarios = match self.total() {
            1 => "1 scenario".to_string(),
            n => format!("{n} scenarios"),
        };
        let failures = match self.failure() {
            1 => "1 failure".to_string(),
            n => format!("{n} failures"),
        };
        let line = format!("{scenarios}, {} skipped, {failures}", self.skipped());
        if self.has_failure() {
            line.red().to_string()
        } else {
            line.green().to_string()
        }
    }
}

pub struct Batch {
    ops: Vec<Operator>,
    result: BatchResult,
}

/// Expand the patterns and build one operator per matched book.
pub fn load(patterns: &[String], opts: &Options) -> Result<Batch> {
    let mut paths = Vec::new();
    for pattern in patterns {
        paths.extend(expand_pattern(pattern)?);
    }
    paths.sort();
    paths.dedup();
    if paths.is_empty() {
        return Err(Error::Build(format!(
            "no runbooks match {}",
            patterns.join(", ")
        )));
    }

    let run_match = match &opts.run_match {
        Some(re) => Some(re.clone()),
        None => match std::env::var(RUN_MATCH_ENV) {
            Ok(pattern) if !pattern.is_empty() => Some(Regex::new(&pattern).map_err(|e| {
                Error::Build(format!("invalid {RUN_MATCH_ENV} regex {pattern:?}: {e}"))
            })?),
            _ => None,
        },
    };

    let mut loaded = Vec::new();
    for path in &paths {
        let op = Operator::new(opts.clone().book(path))?;
        loaded.push(op);
    }

    // Books included from another loaded book do not run on their own.
    let mut skip_paths: Vec<PathBuf> = Vec::new();
    if opts.skip_included {
        for op in &loaded {
            for p in op.include_paths() {
                skip_paths.push(p.canonicalize().unwrap_or(p));
            }
        }
    }

    let mut ops = Vec::new();
    for op in loaded {
        let path = op.book_path().to_string();
        if let Some(re) = &run_match {
            if !re.is_match(&path) {
                debug!(book = %path, "skip: does not match run filter");
                continue;
            }
        }
        let canonical = PathBuf::from(&path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(&path));
        if skip_paths.contains(&canonical) {
            debug!(book = %path, "skip: already included from another runbook");
            continue;
        }
        ops.push(op);
    }

    // Fixed running order.
    ops.sort_by(|a, b| {
        (a.book_path(), a.desc()).cmp(&(b.book_path(), b.desc()))
    });

    if let Some((n, index)) = opts.shard {
        if n == 0 || index >= n {
            return Err(Error::Build(format!("invalid shard {index}/{n}")));
        }
        ops = ops
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % n == index)
            .map(|(_, op)| op)
            .collect();
    }
    if let Some(n) = opts.sample {
        ops = sample_operators(ops, n, opts.seed);
    }

    Ok(Batch {
        ops,
        result: BatchResult::default(),
    })
}

impl Batch {
    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    pub fn operators_mut(&mut self) -> &mut [Operator] {
        &mut self.ops
    }

    pub fn result(&self) -> &BatchResult {
        &self.result
    }

    /// Run every operator in order. A failure is tallied and the batch
    /// continues, unless the failing operator asked for fail-fast.
    pub async fn run_all(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.result = BatchResult::default();
        self.result.total.store(self.ops.len() as i64, Ordering::SeqCst);
        for op in &mut self.ops {
            match op.run(cancel).await {
                Err(err) => {
                    self.result.failure.fetch_add(1, Ordering::SeqCst);
                    if op.fail_fast() {
                        return Err(err);
                    }
                }
                Ok(()) if op.skipped() => {
                    self.result.skipped.fetch_add(1, Ordering::SeqCst);
                }
                Ok(()) => {
                    self.result.success.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }
}

/// Uniform random selection of `n` operators. Seeded from the wall clock
/// unless an explicit seed was given.
fn sample_operators(mut ops: Vec<Operator>, n: usize, seed: Option<u64>) -> Vec<Operator> {
    if ops.len() <= n {
        return ops;
    }
    let seed = seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0)
    });
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sample = Vec::with_capacity(n);
    for _ in 0..n {
        let idx = rng.gen_range(0..ops.len());
        sample.push(ops.remove(idx));
    }
    sample
}

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

/// Expand a path pattern: a literal path, or a glob over `*`, `**` and
/// `?` resolved by walking from the longest literal prefix.
fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    if !pattern.contains(|c| GLOB_CHARS.contains(&c)) {
        let path = PathBuf::from(pattern);
        if !path.is_file() {
            return Err(Error::Build(format!("no such runbook: {pattern}")));
        }
        return Ok(vec![path]);
    }

    let sep_positions: Vec<usize> = pattern
        .char_indices()
        .filter(|(_, c)| *c == '/')
        .map(|(i, _)| i)
        .collect();
    let first_meta = pattern
        .char_indices()
        .find(|(_, c)| GLOB_CHARS.contains(c))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let prefix_end = sep_positions
        .iter()
        .rev()
        .find(|i| **i < first_meta)
        .copied();
    let (root, _) = match prefix_end {
        Some(i) => pattern.split_at(i),
        None => (".", pattern),
    };

    let re = glob_to_regex(pattern)?;
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(if root.is_empty() { "." } else { root })
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_string_lossy().to_string();
        let normalized = path.strip_prefix("./").unwrap_or(&path);
        if re.is_match(normalized) {
            out.push(PathBuf::from(normalized));
        }
    }
    Ok(out)
}

fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` also matches zero directories.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::Build(format!("invalid pattern {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_book(dir: &TempDir, name: &str, desc: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(
            &path,
            format!("desc: {desc}\nsteps:\n  - exec:\n      command: echo {desc}\n"),
        )
        .unwrap();
        path
    }

    fn run(batch: &mut Batch) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(batch.run_all(&CancellationToken::new()))
            .unwrap();
    }

    #[test]
    fn loads_and_sorts_books() {
        let dir = TempDir::new().unwrap();
        let b = write_book(&dir, "b.yml", "second");
        let a = write_book(&dir, "a.yml", "first");
        let batch = load(
            &[b.display().to_string(), a.display().to_string()],
            &Options::new(),
        )
        .unwrap();
        let descs: Vec<&str> = batch.operators().iter().map(|o| o.desc()).collect();
        assert_eq!(descs, ["first", "second"]);
    }

    #[test]
    fn glob_pattern_finds_books() {
        let dir = TempDir::new().unwrap();
        write_book(&dir, "books/a.yml", "a");
        write_book(&dir, "books/nested/b.yml", "b");
        let pattern = format!("{}/books/**/*.yml", dir.path().display());
        let batch = load(&[pattern], &Options::new()).unwrap();
        assert_eq!(batch.operators().len(), 2);
    }

    #[test]
    fn run_match_filters_books() {
        let dir = TempDir::new().unwrap();
        let a = write_book(&dir, "a.yml", "a");
        let b = write_book(&dir, "b.yml", "b");
        let opts = Options::new().run_match("b\\.yml$").unwrap();
        let mut batch = load(
            &[a.display().to_string(), b.display().to_string()],
            &opts,
        )
        .unwrap();
        assert_eq!(batch.operators().len(), 1);
        run(&mut batch);
        assert_eq!(batch.result().total(), 1);
        assert_eq!(batch.result().success(), 1);
    }

    #[test]
    fn tallies_add_up() {
        let dir = TempDir::new().unwrap();
        let ok = write_book(&dir, "ok.yml", "ok");
        let skip = dir.path().join("skip.yml");
        fs::write(&skip, "desc: s\nif: \"false\"\nsteps: []\n").unwrap();
        let bad = dir.path().join("bad.yml");
        fs::write(&bad, "desc: b\nsteps:\n  - test: \"false\"\n").unwrap();

        let mut batch = load(
            &[
                ok.display().to_string(),
                skip.display().to_string(),
                bad.display().to_string(),
            ],
            &Options::new(),
        )
        .unwrap();
        run(&mut batch);
        let r = batch.result();
        assert_eq!(r.total(), 3);
        assert_eq!(r.total(), r.success() + r.failure() + r.skipped());
        assert_eq!(r.failure(), 1);
        assert_eq!(r.skipped(), 1);
        assert!(r.has_failure());
    }

    #[test]
    fn sharding_partitions_deterministically() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<String> = (0..4)
            .map(|i| {
                write_book(&dir, &format!("{i}.yml"), &format!("book{i}"))
                    .display()
                    .to_string()
            })
            .collect();
        let all = load(&paths, &Options::new()).unwrap();
        let shard0 = load(&paths, &Options::new().shard(2, 0)).unwrap();
        let shard1 = load(&paths, &Options::new().shard(2, 1)).unwrap();
        assert_eq!(all.operators().len(), 4);
        assert_eq!(shard0.operators().len(), 2);
        assert_eq!(shard1.operators().len(), 2);
        assert!(load(&paths, &Options::new().shard(2, 2)).is_err());
    }

    #[test]
    fn sampling_with_seed_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<String> = (0..5)
            .map(|i| {
                write_book(&dir, &format!("{i}.yml"), &format!("book{i}"))
                    .display()
                    .to_string()
            })
            .collect();
        let one = load(&paths, &Options::new().sample(2).seed(42)).unwrap();
        let two = load(&paths, &Options::new().sample(2).seed(42)).unwrap();
        let descs = |b: &Batch| -> Vec<String> {
            b.operators().iter().map(|o| o.desc().to_string()).collect()
        };
        assert_eq!(descs(&one), descs(&two));
        assert_eq!(one.operators().len(), 2);
    }

    #[test]
    fn skip_included_prunes_child_books() {
        let dir = TempDir::new().unwrap();
        let child = dir.path().join("child.yml");
        fs::write(&child, "desc: child\nsteps:\n  - exec:\n      command: echo c\n").unwrap();
        let parent = dir.path().join("parent.yml");
        fs::write(
            &parent,
            "desc: parent\nsteps:\n  - include: child.yml\n",
        )
        .unwrap();

        let opts = Options::new().skip_included(true);
        let batch = load(
            &[parent.display().to_string(), child.display().to_string()],
            &opts,
        )
        .unwrap();
        let descs: Vec<&str> = batch.operators().iter().map(|o| o.desc()).collect();
        assert_eq!(descs, ["parent"]);
    }

    #[test]
    fn summary_pluralizes() {
        let r = BatchResult::default();
        r.total.store(1, Ordering::SeqCst);
        colored::control::set_override(false);
        assert_eq!(r.summary(), "1 scenario, 0 skipped, 0 failures");
        r.total.store(3, Ordering::SeqCst);
        r.failure.store(1, Ordering::SeqCst);
        assert_eq!(r.summary(), "3 scenarios, 0 skipped, 1 failure");
    }
}
