//! `script` step handler
//!
//! Runs a shell command or a script file on the host.
//!
//! ```yaml
//! - id: build
//!   type: script
//!   parameters:
//!     command: "make build"
//!     working_dir: "./app"
//!     env:
//!       PROFILE: release
//!
//! - id: report
//!   type: script
//!   parameters:
//!     script: "./scripts/report.py"
//!     interpreter: python3
//!     args: ["--since", "${since}"]
//! ```
//!
//! Result: `{stdout, stderr, exit_code}`. A non-zero exit fails the step with
//! stderr, or the exit code when stderr is empty.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use crate::engine::error::HandlerError;
use crate::engine::instance::{StepRuntime, WorkflowInstance};
use crate::engine::registry::StepHandler;
use crate::workflow::interpolate::stringify;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptHandler;

fn script_args(step: &StepRuntime) -> Vec<String> {
    match step.parameters.get("args") {
        Some(Value::Array(items)) => items.iter().map(stringify).collect(),
        Some(Value::String(s)) => {
            // JSON array text or whitespace separated
            serde_json::from_str::<Vec<String>>(s)
                .unwrap_or_else(|_| s.split_whitespace().map(String::from).collect())
        }
        _ => Vec::new(),
    }
}

fn build_command(step: &StepRuntime) -> Result<Command, HandlerError> {
    let mut cmd = if let Some(command) = step.param_str("command") {
        info!(step_id = %step.id, "Executing command: {}", command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    } else if let Some(script) = step.param_str("script") {
        let interpreter = step.param_str("interpreter").unwrap_or("bash");
        let program = which::which(interpreter).map_err(|e| {
            HandlerError::invalid("interpreter", format!("'{}' not found: {}", interpreter, e))
        })?;
        info!(step_id = %step.id, interpreter = %program.display(), "Executing script: {}", script);
        let mut cmd = Command::new(program);
        cmd.arg(script).args(script_args(step));
        cmd
    } else {
        return Err(HandlerError::MissingParameter(
            "script step requires either 'command' or 'script'".to_string(),
        ));
    };

    if let Some(dir) = step.param_str("working_dir") {
        cmd.current_dir(dir);
    }

    if let Some(Value::Object(env)) = step.parameters.get("env") {
        for (key, value) in env {
            cmd.env(key, stringify(value));
        }
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    Ok(cmd)
}

#[async_trait]
impl StepHandler for ScriptHandler {
    async fn execute(
        &self,
        _instance: &WorkflowInstance,
        step: &StepRuntime,
    ) -> Result<Value, HandlerError> {
        let output = build_command(step)?
            .output()
            .await
            .map_err(|e| HandlerError::failed(format!("Failed to execute command: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(HandlerError::Failed(if stderr.is_empty() {
                format!("Command exited with code {}", exit_code)
            } else {
                stderr
            }));
        }

        info!(step_id = %step.id, "Command completed successfully");
        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": exit_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handlers::test_support::instance_with;

    async fn run(params: Value) -> Result<Value, HandlerError> {
        let (instance, step) = instance_with("script", params, json!({}));
        ScriptHandler.execute(&instance, &step).await
    }

    #[tokio::test]
    async fn test_command() {
        let result = run(json!({"command": "echo hello"})).await.unwrap();
        assert_eq!(result["stdout"], json!("hello"));
        assert_eq!(result["exit_code"], json!(0));
    }

    #[tokio::test]
    async fn test_failing_command_reports_stderr() {
        let err = run(json!({"command": "echo broken >&2; exit 3"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "broken");

        let err = run(json!({"command": "exit 4"})).await.unwrap_err();
        assert_eq!(err.to_string(), "Command exited with code 4");
    }

    #[tokio::test]
    async fn test_working_dir_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(json!({
            "command": "echo $GREETING > out.txt && cat out.txt",
            "working_dir": dir.path().to_str().unwrap(),
            "env": {"GREETING": "hi"}
        }))
        .await
        .unwrap();
        assert_eq!(result["stdout"], json!("hi"));
        assert!(dir.path().join("out.txt").exists());
    }

    #[tokio::test]
    async fn test_script_with_args() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("greet.sh");
        std::fs::write(&script, "echo \"$1-$2\"\n").unwrap();

        let result = run(json!({
            "script": script.to_str().unwrap(),
            "interpreter": "sh",
            "args": ["a", 2]
        }))
        .await
        .unwrap();
        assert_eq!(result["stdout"], json!("a-2"));
    }

    #[tokio::test]
    async fn test_missing_params() {
        assert!(matches!(
            run(json!({})).await,
            Err(HandlerError::MissingParameter(_))
        ));
    }
}
