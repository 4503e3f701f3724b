//! End-to-end scenarios: runbooks driven against a stub HTTP server,
//! an in-memory SQLite database, and local commands.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use opsbook::{load, Operator, Options};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Minimal HTTP stub: answers each request with the next status in the
/// list (repeating the last one), JSON body `{"ok": <status==200>}`.
async fn serve_statuses(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let status = statuses.get(n).or(statuses.last()).copied().unwrap_or(200);
            let mut buf = Vec::new();
            let mut tmp = [0u8; 1024];
            loop {
                match sock.read(&mut tmp).await {
                    Ok(0) => break,
                    Ok(read) => {
                        buf.extend_from_slice(&tmp[..read]);
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            let body = format!("{{\"ok\":{}}}", status == 200);
            let response = format!(
                "HTTP/1.1 {status} STATUS\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(response.as_bytes()).await;
        }
    });
    (format!("http://{addr}"), calls)
}

async fn run_yaml(src: &str) -> (Operator, opsbook::Result<()>) {
    let mut op = Operator::new(Options::new().from_yaml(src)).unwrap();
    let result = op.run(&CancellationToken::new()).await;
    (op, result)
}

#[tokio::test]
async fn http_scenario_records_frames_and_passes_test() {
    let (dsn, calls) = serve_statuses(vec![200]).await;
    let src = format!(
        r#"
desc: ping
runners:
  req: {dsn}
steps:
  - req:
      /:
        get: null
  - test: steps[0].res.status == 200
"#
    );
    let (op, result) = run_yaml(&src).await;
    result.unwrap();
    let frames = op.frames();
    assert_eq!(frames.as_array().unwrap().len(), 2);
    assert_eq!(frames[1], Value::Null);
    assert_eq!(frames[0]["res"]["body"]["ok"], json!(true));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn until_loop_retries_until_success() {
    let (dsn, calls) = serve_statuses(vec![500, 500, 200]).await;
    let src = format!(
        r#"
desc: retry until healthy
runners:
  req: {dsn}
steps:
  - loop:
      count: 5
      interval: 0s
      until: current.res.status == 200
    req:
      /health:
        get: null
"#
    );
    let (op, result) = run_yaml(&src).await;
    result.unwrap();
    let frames = op.frames();
    assert_eq!(frames.as_array().unwrap().len(), 1);
    assert_eq!(frames[0]["res"]["status"], json!(200));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_loop_fails_and_server_saw_every_try() {
    let (dsn, calls) = serve_statuses(vec![500]).await;
    let src = format!(
        r#"
desc: never healthy
runners:
  req: {dsn}
steps:
  - loop:
      count: 2
      interval: 0s
      until: current.res.status == 200
    req:
      /health:
        get: null
"#
    );
    let (_, result) = run_yaml(&src).await;
    let msg = result.unwrap_err().to_string();
    assert!(msg.contains("retry loop failed"));
    assert!(msg.contains("current.res.status => 500"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn guarded_book_is_skipped_without_calls() {
    let (dsn, calls) = serve_statuses(vec![200]).await;
    let src = format!(
        r#"
desc: guarded
if: vars.run
runners:
  req: {dsn}
vars:
  run: false
steps:
  - req:
      /:
        get: null
"#
    );
    let (op, result) = run_yaml(&src).await;
    result.unwrap();
    assert!(op.skipped());
    assert_eq!(op.frames().as_array().unwrap().len(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn duplicate_runner_keys_fail_at_build_time() {
    let src = r#"
desc: duplicate keys
runners:
  req: http://localhost:1
  req: grpc://localhost:1
steps: []
"#;
    assert!(Operator::new(Options::new().from_yaml(src)).is_err());
}

#[tokio::test]
async fn db_scenario_reads_rows() {
    let src = r#"
desc: sqlite roundtrip
runners:
  db: "sqlite::memory:"
steps:
  - db:
      query: SELECT 1 AS one, 'hi' AS greeting
  - test: steps[0].rows[0].one == 1 && steps[0].rows[0].greeting == "hi"
"#;
    let (_, result) = run_yaml(src).await;
    result.unwrap();
}

#[tokio::test]
async fn payloads_are_expanded_through_the_store() {
    let (dsn, _) = serve_statuses(vec![200]).await;
    let src = format!(
        r#"
desc: expansion
runners:
  req: {dsn}
vars:
  who: alice
steps:
  - exec:
      command: echo -n {{{{ vars.who }}}}
    bind:
      name: current.stdout
  - req:
      /hello:
        post:
          body:
            name: "{{{{ name }}}}"
  - test: steps[1].req.body.name == "alice"
"#
    );
    let (_, result) = run_yaml(&src).await;
    result.unwrap();
}

#[tokio::test]
async fn include_runs_child_with_parent_runners_and_binds() {
    let dir = tempfile::TempDir::new().unwrap();
    let (dsn, calls) = serve_statuses(vec![200]).await;

    let child = dir.path().join("child.yml");
    std::fs::write(
        &child,
        r#"
desc: child
vars:
  greeting: default
steps:
  - req:
      /from-child:
        get: null
  - test: included == true && vars.greeting == "from-parent" && token == "s3cret"
"#,
    )
    .unwrap();

    let parent = dir.path().join("parent.yml");
    std::fs::write(
        &parent,
        format!(
            r#"
desc: parent
runners:
  req: {dsn}
steps:
  - exec:
      command: echo -n s3cret
    bind:
      token: current.stdout
  - include:
      path: child.yml
      vars:
        greeting: from-parent
  - test: steps[1].steps[0].res.status == 200
"#
        ),
    )
    .unwrap();

    let mut op = Operator::new(Options::new().book(&parent)).unwrap();
    op.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let frames = op.frames();
    assert_eq!(frames.as_array().unwrap().len(), 3);
    assert_eq!(frames[1]["vars"]["greeting"], json!("from-parent"));
}

#[tokio::test]
async fn include_cycle_fails_deterministically() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("a.yml"),
        "desc: a\nsteps:\n  - include: b.yml\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("b.yml"),
        "desc: b\nsteps:\n  - include: a.yml\n",
    )
    .unwrap();

    let mut op = Operator::new(Options::new().book(dir.path().join("a.yml"))).unwrap();
    let err = op.run(&CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("include depth"));
}

#[tokio::test]
async fn batch_filters_by_run_match_and_tallies() {
    let dir = tempfile::TempDir::new().unwrap();
    let a = dir.path().join("a.yml");
    std::fs::write(&a, "desc: a\nsteps:\n  - exec:\n      command: echo a\n").unwrap();
    let b = dir.path().join("b.yml");
    std::fs::write(&b, "desc: b\nsteps:\n  - exec:\n      command: echo b\n").unwrap();

    let opts = Options::new().run_match("b\\.yml$").unwrap();
    let mut batch = load(
        &[a.display().to_string(), b.display().to_string()],
        &opts,
    )
    .unwrap();
    batch.run_all(&CancellationToken::new()).await.unwrap();
    let result = batch.result();
    assert_eq!(result.total(), 1);
    assert_eq!(result.success(), 1);
    assert!(!result.has_failure());
}

#[tokio::test]
async fn batch_load_order_is_deterministic() {
    let dir = tempfile::TempDir::new().unwrap();
    for name in ["c.yml", "a.yml", "b.yml"] {
        std::fs::write(
            dir.path().join(name),
            "desc: x\nsteps:\n  - exec:\n      command: echo x\n",
        )
        .unwrap();
    }
    let pattern = format!("{}/*.yml", dir.path().display());
    let one = load(&[pattern.clone()], &Options::new()).unwrap();
    let two = load(&[pattern], &Options::new()).unwrap();
    let paths = |b: &opsbook::Batch| -> Vec<String> {
        b.operators()
            .iter()
            .map(|o| o.book_path().to_string())
            .collect()
    };
    assert_eq!(paths(&one), paths(&two));
    let sorted = {
        let mut p = paths(&one);
        p.sort();
        p
    };
    assert_eq!(paths(&one), sorted);
}

#[tokio::test]
async fn interval_and_cancellation_cooperate() {
    let src = r#"
desc: canceled between steps
steps:
  - exec:
      command: echo one
  - exec:
      command: echo two
"#;
    let mut op = Operator::new(
        Options::new()
            .from_yaml(src)
            .interval(std::time::Duration::from_secs(30)),
    )
    .unwrap();
    let cancel = CancellationToken::new();
    let canceler = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        canceler.cancel();
    });
    let err = op.run(&cancel).await.unwrap_err();
    assert!(err.is_canceled());
}
