//! Local command runner.
//!
//! Commands run through a shell (`sh -c` by default). A non-zero exit is
//! recorded in the frame, not treated as a failure — assertions decide.

use std::process::Stdio;

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::capture::Capturers;
use crate::errors::{Error, Result};

#[derive(Default)]
pub struct ExecRunner;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecCommand {
    pub command: String,
    pub shell: String,
    pub stdin: Option<String>,
}

/// Parse the expanded step payload: `{command, shell?, stdin?}`.
pub fn parse_exec_command(expanded: &Value) -> Result<ExecCommand> {
    let m = expanded
        .as_object()
        .ok_or_else(|| Error::Build(format!("invalid exec command: {expanded}")))?;
    let command = m
        .get("command")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Build(format!("exec needs a command: {expanded}")))?
        .to_string();
    let shell = match m.get("shell") {
        None | Some(Value::Null) => "sh".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => return Err(Error::Build(format!("invalid exec shell: {other}"))),
    };
    let stdin = match m.get("stdin") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(Error::Build(format!("invalid exec stdin: {other}"))),
    };
    for key in m.keys() {
        if !matches!(key.as_str(), "command" | "shell" | "stdin") {
            return Err(Error::Build(format!("unknown exec field: {key}")));
        }
    }
    Ok(ExecCommand {
        command,
        shell,
        stdin,
    })
}

impl ExecRunner {
    pub async fn run(
        &self,
        cmd: &ExecCommand,
        caps: &mut Capturers,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        caps.exec_command(&cmd.command);

        let mut child = tokio::process::Command::new(&cmd.shell)
            .arg("-c")
            .arg(&cmd.command)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Runner {
                kind: "exec command",
                message: e.to_string(),
            })?;

        if let Some(input) = &cmd.stdin {
            caps.exec_stdin(input);
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|e| Error::Runner {
                        kind: "exec command",
                        message: format!("cannot write stdin: {e}"),
                    })?;
                // Closing the handle signals EOF to the child.
                drop(stdin);
            }
        }

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            out = child.wait_with_output() => out.map_err(|e| Error::Runner {
                kind: "exec command",
                message: e.to_string(),
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        caps.exec_stdout(&stdout);
        caps.exec_stderr(&stderr);

        Ok(json!({
            "command": cmd.command,
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_command_with_defaults() {
        let cmd = parse_exec_command(&json!({"command": "echo hi"})).unwrap();
        assert_eq!(cmd.command, "echo hi");
        assert_eq!(cmd.shell, "sh");
        assert_eq!(cmd.stdin, None);
    }

    #[test]
    fn parses_stdin_and_shell() {
        let cmd =
            parse_exec_command(&json!({"command": "cat", "stdin": "data", "shell": "bash"}))
                .unwrap();
        assert_eq!(cmd.stdin.as_deref(), Some("data"));
        assert_eq!(cmd.shell, "bash");
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(parse_exec_command(&json!({"cmd": "echo"})).is_err());
        assert!(parse_exec_command(&json!({"command": "x", "cwd": "/"})).is_err());
        assert!(parse_exec_command(&json!("echo")).is_err());
    }

    #[tokio::test]
    async fn runs_command_and_records_frame() {
        let runner = ExecRunner;
        let cmd = parse_exec_command(&json!({"command": "echo hello"})).unwrap();
        let mut caps = Capturers::new();
        let cancel = CancellationToken::new();
        let frame = runner.run(&cmd, &mut caps, &cancel).await.unwrap();
        assert_eq!(frame["stdout"], json!("hello\n"));
        assert_eq!(frame["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn nonzero_exit_is_recorded_not_fatal() {
        let runner = ExecRunner;
        let cmd = parse_exec_command(&json!({"command": "exit 3"})).unwrap();
        let mut caps = Capturers::new();
        let cancel = CancellationToken::new();
        let frame = runner.run(&cmd, &mut caps, &cancel).await.unwrap();
        assert_eq!(frame["exit_code"], json!(3));
    }

    #[tokio::test]
    async fn stdin_is_piped() {
        let runner = ExecRunner;
        let cmd = parse_exec_command(&json!({"command": "cat", "stdin": "ping"})).unwrap();
        let mut caps = Capturers::new();
        let cancel = CancellationToken::new();
        let frame = runner.run(&cmd, &mut caps, &cancel).await.unwrap();
        assert_eq!(frame["stdout"], json!("ping"));
    }

    #[tokio::test]
    async fn cancellation_aborts() {
        let runner = ExecRunner;
        let cmd = parse_exec_command(&json!({"command": "sleep 10"})).unwrap();
        let mut caps = Capturers::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner.run(&cmd, &mut caps, &cancel).await.unwrap_err();
        assert!(err.is_canceled());
    }
}
