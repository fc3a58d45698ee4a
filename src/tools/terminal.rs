use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use super::{new_tool, parse_input, Tool};
use crate::types::tools::ToolResult;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TerminalInput {
    command: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// `run_terminal_command`: run a shell command in `root`.
///
/// The child is killed when the call times out or the run is cancelled.
pub fn terminal_tool(root: impl Into<PathBuf>) -> Tool {
    let root = root.into();
    new_tool(
        "run_terminal_command",
        "Run a shell command in the project root",
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_seconds": {"type": "integer", "minimum": 1}
            },
            "required": ["command"]
        }),
        move |input, ctx| {
            let root = root.clone();
            async move {
                let input: TerminalInput = match parse_input(input) {
                    Ok(input) => input,
                    Err(err) => return err,
                };
                let timeout = input
                    .timeout_seconds
                    .map_or(DEFAULT_TIMEOUT, Duration::from_secs);

                let mut cmd = Command::new("sh");
                cmd.arg("-c")
                    .arg(&input.command)
                    .current_dir(&root)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);

                let child = match cmd.spawn() {
                    Ok(child) => child,
                    Err(e) => {
                        return vec![ToolResult::error(format!("failed to spawn command: {e}"))];
                    }
                };

                tracing::debug!(command = %input.command, run_id = %ctx.run_id, "running terminal command");

                let output = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        return vec![ToolResult::error("command aborted")];
                    }
                    res = tokio::time::timeout(timeout, child.wait_with_output()) => match res {
                        Ok(Ok(output)) => output,
                        Ok(Err(e)) => {
                            return vec![ToolResult::error(format!("command failed: {e}"))];
                        }
                        Err(_) => {
                            tracing::warn!(command = %input.command, ?timeout, "terminal command timed out");
                            return vec![ToolResult::error(format!(
                                "command timed out after {}s",
                                timeout.as_secs()
                            ))];
                        }
                    },
                };

                vec![ToolResult::json(serde_json::json!({
                    "command": input.command,
                    "stdout": String::from_utf8_lossy(&output.stdout),
                    "stderr": String::from_utf8_lossy(&output.stderr),
                    "exit_code": output.status.code(),
                }))]
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{test_context, ToolExecutor, ToolSet};
    use crate::types::tools::ToolCall;

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let set = ToolSet::new(vec![terminal_tool(dir.path())]);
        let call = ToolCall::new(
            "run_terminal_command",
            serde_json::json!({"command": "echo hi; echo oops >&2; exit 3"}),
        );
        let result = set.execute(&call, &test_context()).await;
        let out = result[0].as_json().unwrap();
        assert_eq!(out["stdout"], "hi\n");
        assert_eq!(out["stderr"], "oops\n");
        assert_eq!(out["exit_code"], 3);
    }

    #[tokio::test]
    async fn runs_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let set = ToolSet::new(vec![terminal_tool(dir.path())]);
        let call = ToolCall::new("run_terminal_command", serde_json::json!({"command": "cat marker.txt"}));
        let result = set.execute(&call, &test_context()).await;
        assert_eq!(result[0].as_json().unwrap()["stdout"], "here");
    }

    #[tokio::test]
    async fn times_out() {
        let dir = tempfile::tempdir().unwrap();
        let set = ToolSet::new(vec![terminal_tool(dir.path())]);
        let call = ToolCall::new(
            "run_terminal_command",
            serde_json::json!({"command": "sleep 5", "timeout_seconds": 1}),
        );
        let result = set.execute(&call, &test_context()).await;
        assert!(result[0].as_error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_aborts_command() {
        let dir = tempfile::tempdir().unwrap();
        let set = ToolSet::new(vec![terminal_tool(dir.path())]);
        let ctx = test_context();
        ctx.cancel.cancel();
        let call = ToolCall::new("run_terminal_command", serde_json::json!({"command": "sleep 5"}));
        let result = set.execute(&call, &ctx).await;
        assert_eq!(result[0].as_error(), Some("command aborted"));
    }
}
