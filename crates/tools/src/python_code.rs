//! Python tool: evaluate a snippet with a local interpreter.
//!
//! Expressions print their value; statements run as-is and return whatever
//! they print. Every run is bounded by a wall-clock timeout after which the
//! interpreter is killed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dewey_core::error::ToolError;
use dewey_core::tool::{ParamType, Tool, ToolResult, ToolSchema};
use tokio::process::Command;
use tracing::{debug, warn};

/// Evaluates `argv[1]` as an expression when it parses as one, else executes it.
const RUNNER: &str = r#"import sys
src = sys.argv[1]
try:
    code = compile(src, "<dewey>", "eval")
except SyntaxError:
    exec(compile(src, "<dewey>", "exec"), {})
else:
    print(eval(code, {}))
"#;

/// Longest output handed back to the model.
const MAX_OUTPUT_CHARS: usize = 10_000;

pub struct PythonCodeTool {
    interpreter: String,
    timeout: Duration,
}

impl PythonCodeTool {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

impl Default for PythonCodeTool {
    fn default() -> Self {
        Self::new("python3", Duration::from_secs(10))
    }
}

#[async_trait]
impl Tool for PythonCodeTool {
    fn name(&self) -> &str {
        "python_code"
    }

    fn description(&self) -> &str {
        "Run Python code and return its output. A single expression returns its value; \
         statements return what they print."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().param(
            "code",
            ParamType::String,
            "Python code, e.g. 'sum(range(10))'",
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;

        debug!(interpreter = %self.interpreter, "Running python snippet");

        let child = Command::new(&self.interpreter)
            .args(["-c", RUNNER, code])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "python_code".into(),
                reason: format!("failed to start {}: {e}", self.interpreter),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ToolError::ExecutionFailed {
                tool_name: "python_code".into(),
                reason: e.to_string(),
            })?,
            Err(_) => {
                let timeout_secs = secs_rounded_up(self.timeout);
                warn!(timeout_secs, "Python snippet timed out");
                return Err(ToolError::Timeout {
                    tool_name: "python_code".into(),
                    timeout_secs,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            return Err(ToolError::ExecutionFailed {
                tool_name: "python_code".into(),
                reason: format!("exit code {code}: {}", last_line(&stderr)),
            });
        }

        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            text = format!("{text}\n[stderr]: {}", stderr.trim());
        }
        if text.chars().count() > MAX_OUTPUT_CHARS {
            text = text.chars().take(MAX_OUTPUT_CHARS).collect::<String>() + "\n[truncated]";
        }
        Ok(ToolResult::ok(text))
    }
}

/// Python puts the exception type and message on the final traceback line.
fn last_line(stderr: &str) -> &str {
    stderr.trim().lines().last().unwrap_or("")
}

/// Whole seconds, never reporting a sub-second limit as zero.
fn secs_rounded_up(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn last_line_of_traceback() {
        let tb = "Traceback (most recent call last):\n  File \"<dewey>\", line 1\nZeroDivisionError: division by zero\n";
        assert_eq!(last_line(tb), "ZeroDivisionError: division by zero");
        assert_eq!(last_line(""), "");
    }

    #[tokio::test]
    async fn missing_code_argument() {
        let err = PythonCodeTool::default().execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn missing_interpreter_is_execution_error() {
        let tool = PythonCodeTool::new("definitely-not-a-python-binary", Duration::from_secs(1));
        let err = tool.execute(serde_json::json!({"code": "1"})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn expression_prints_value() {
        if !python_available() {
            return;
        }
        let result = PythonCodeTool::default()
            .execute(serde_json::json!({"code": "sum(range(10))"}))
            .await
            .unwrap();
        assert_eq!(result.output, "45");
    }

    #[tokio::test]
    async fn statements_return_printed_output() {
        if !python_available() {
            return;
        }
        let result = PythonCodeTool::default()
            .execute(serde_json::json!({"code": "x = 6\nprint(x * 7)"}))
            .await
            .unwrap();
        assert_eq!(result.output, "42");
    }

    #[tokio::test]
    async fn exceptions_become_errors() {
        if !python_available() {
            return;
        }
        let err = PythonCodeTool::default()
            .execute(serde_json::json!({"code": "1/0"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn runaway_code_is_killed() {
        if !python_available() {
            return;
        }
        let tool = PythonCodeTool::new("python3", Duration::from_millis(300));
        let err = tool
            .execute(serde_json::json!({"code": "while True: pass"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_secs: 1, .. }));
        assert!(err.to_string().contains("within 1s"));
    }

    #[test]
    fn timeout_seconds_round_up() {
        assert_eq!(secs_rounded_up(Duration::from_millis(300)), 1);
        assert_eq!(secs_rounded_up(Duration::from_secs(10)), 10);
        assert_eq!(secs_rounded_up(Duration::from_millis(10_001)), 11);
        assert_eq!(secs_rounded_up(Duration::ZERO), 0);
    }
}
