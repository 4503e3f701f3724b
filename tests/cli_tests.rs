//! Integration tests for the opsbook CLI binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn opsbook() -> Command {
    Command::cargo_bin("opsbook").unwrap()
}

#[test]
fn help_shows_subcommands() {
    opsbook()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("lint"))
        .stdout(predicate::str::contains("fmt"))
        .stdout(predicate::str::contains("reportportal"));
}

#[test]
fn run_passing_book_exits_zero() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("ok.yml");
    fs::write(
        &book,
        "desc: ok\nsteps:\n  - exec:\n      command: echo hi\n  - test: steps[0].exit_code == 0\n",
    )
    .unwrap();

    opsbook()
        .args(["run", book.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::contains("ok"))
        .stderr(predicate::str::contains("1 scenario, 0 skipped, 0 failures"));
}

#[test]
fn run_failing_book_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("bad.yml");
    fs::write(&book, "desc: bad\nsteps:\n  - test: \"false\"\n").unwrap();

    opsbook()
        .args(["run", book.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 failure"));
}

#[test]
fn run_var_overrides_are_applied() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("vars.yml");
    fs::write(
        &book,
        "desc: vars\nvars:\n  n: 1\nsteps:\n  - test: vars.n == 2\n",
    )
    .unwrap();

    opsbook()
        .args(["run", "--var", "n:2", book.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn lint_reports_build_errors() {
    let dir = TempDir::new().unwrap();
    let good = dir.path().join("good.yml");
    fs::write(&good, "desc: g\nsteps:\n  - test: \"true\"\n").unwrap();
    let bad = dir.path().join("bad.yml");
    fs::write(&bad, "desc: b\nsteps:\n  - unknown:\n      /x:\n        get: null\n").unwrap();

    opsbook()
        .args(["lint", good.to_str().unwrap()])
        .assert()
        .success();

    opsbook()
        .args(["lint", good.to_str().unwrap(), bad.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("cannot find runner"));
}

#[test]
fn fmt_prints_canonical_order() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("messy.yml");
    fs::write(
        &book,
        "steps:\n  - exec:\n      command: echo hi\ndesc: messy\nrunners:\n  req: http://localhost:1\n",
    )
    .unwrap();

    let output = opsbook()
        .args(["fmt", book.to_str().unwrap()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let desc = text.find("desc:").unwrap();
    let runners = text.find("runners:").unwrap();
    let steps = text.find("steps:").unwrap();
    assert!(desc < runners && runners < steps);
}

#[test]
fn fmt_write_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("messy.yml");
    fs::write(&book, "steps: []\ndesc: x\n").unwrap();

    opsbook()
        .args(["fmt", "--write", book.to_str().unwrap()])
        .assert()
        .success();
    let first = fs::read_to_string(&book).unwrap();

    opsbook()
        .args(["fmt", "--write", book.to_str().unwrap()])
        .assert()
        .success();
    let second = fs::read_to_string(&book).unwrap();
    assert_eq!(first, second);
}

#[test]
fn fmt_bad_yaml_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let book = dir.path().join("broken.yml");
    fs::write(&book, ": not yaml\n  -").unwrap();

    opsbook()
        .args(["fmt", book.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn new_generates_http_step_from_curl() {
    opsbook()
        .args([
            "new",
            "--",
            "curl",
            "-H",
            "Content-Type: application/json",
            "-d",
            r#"{"name":"alice"}"#,
            "https://api.example.com/users",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("req: https://api.example.com"))
        .stdout(predicate::str::contains("post:"));
}

#[test]
fn new_generates_exec_step_from_tokens() {
    opsbook()
        .args(["new", "--", "echo", "hello world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("exec:"))
        .stdout(predicate::str::contains("hello world"));
}

#[test]
fn reportportal_requires_configuration() {
    let dir = TempDir::new().unwrap();
    let xml = dir.path().join("junit.xml");
    fs::write(&xml, "<testsuites/>").unwrap();

    opsbook()
        .args(["reportportal", xml.to_str().unwrap()])
        .env_remove("RP_ENDPOINT")
        .env_remove("RP_TOKEN")
        .env_remove("RP_PROJECT")
        .assert()
        .failure()
        .stderr(predicate::str::contains("endpoint"));
}
