//! Claude Code CLI invoker.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{
    AgentInvoker, CompletionDetector, InvocationRequest, InvocationResult, InvocationStatus,
};

/// Invoker for the Claude Code CLI.
///
/// Spawns `claude` in non-interactive mode, streams its output line by line
/// for completion detection, and enforces a total wall-clock timeout.
pub struct ClaudeAgent {
    /// Path to the claude CLI binary.
    cli_path: String,
    detector: CompletionDetector,
    total_timeout: Duration,
}

impl ClaudeAgent {
    /// Creates an invoker using the default `claude` command.
    pub fn new(completion_marker: impl Into<String>) -> Self {
        Self {
            cli_path: "claude".to_string(),
            detector: CompletionDetector::new(completion_marker),
            total_timeout: Duration::from_secs(1800),
        }
    }

    /// Sets a custom CLI path.
    pub fn with_cli_path(mut self, cli_path: impl Into<String>) -> Self {
        self.cli_path = cli_path.into();
        self
    }

    /// Sets the total timeout for one invocation.
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// Builds the command arguments for one invocation.
    fn build_args(&self, request: &InvocationRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(), // Non-interactive mode
            // Headless runs cannot answer permission prompts
            "--dangerously-skip-permissions".to_string(),
        ];

        if let Some(model) = &request.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args.push("-p".to_string());
        args.push(request.prompt.clone());

        args
    }

    async fn run(&self, request: &InvocationRequest) -> Result<InvocationResult> {
        let args = self.build_args(request);

        tracing::info!(
            cli = %self.cli_path,
            work_dir = ?request.work_dir,
            model = ?request.model,
            "spawning agent"
        );

        let mut child = Command::new(&self.cli_path)
            .args(&args)
            .current_dir(&request.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::AgentSpawn(format!("failed to spawn {}: {}", self.cli_path, e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::AgentSpawn("stdout was not piped".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            Error::AgentSpawn("stderr was not piped".to_string())
        })?;

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        let mut output = String::new();
        let mut completion_signaled = false;
        let mut stdout_done = false;
        let mut stderr_done = false;

        // Drain both streams; only complete lines are checked for the
        // completion marker.
        while !stdout_done || !stderr_done {
            tokio::select! {
                line = stdout_reader.next_line(), if !stdout_done => {
                    match line {
                        Ok(Some(line)) => {
                            if self.detector.line_signals(&line) {
                                completion_signaled = true;
                            }
                            output.push_str(&line);
                            output.push('\n');
                        }
                        Ok(None) => stdout_done = true,
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading agent stdout");
                            stdout_done = true;
                        }
                    }
                }
                line = stderr_reader.next_line(), if !stderr_done => {
                    match line {
                        Ok(Some(line)) => {
                            output.push_str(&line);
                            output.push('\n');
                        }
                        Ok(None) => stderr_done = true,
                        Err(e) => {
                            tracing::warn!(error = %e, "error reading agent stderr");
                            stderr_done = true;
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::AgentSpawn(format!("failed to wait for agent: {}", e)))?;

        Ok(InvocationResult {
            status: if status.success() {
                InvocationStatus::Success
            } else {
                InvocationStatus::Failure
            },
            completion_signaled,
            output,
            exit_code: status.code(),
        })
    }
}

#[async_trait]
impl AgentInvoker for ClaudeAgent {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult> {
        match tokio::time::timeout(self.total_timeout, self.run(&request)).await {
            Ok(result) => result,
            Err(_) => {
                // The dropped future kills the child (kill_on_drop).
                tracing::warn!(
                    timeout_secs = self.total_timeout.as_secs(),
                    "agent invocation timed out"
                );
                Ok(InvocationResult {
                    status: InvocationStatus::Timeout,
                    completion_signaled: false,
                    output: String::new(),
                    exit_code: None,
                })
            }
        }
    }

    fn name(&self) -> &str {
        "claude-code"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(prompt: &str, model: Option<&str>) -> InvocationRequest {
        InvocationRequest {
            prompt: prompt.to_string(),
            model: model.map(String::from),
            work_dir: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn builds_basic_args() {
        let agent = ClaudeAgent::new("LOOP_COMPLETE");
        let args = agent.build_args(&request("do the task", None));

        assert!(args.contains(&"--print".to_string()));
        assert!(args.contains(&"do the task".to_string()));
        assert!(!args.contains(&"--model".to_string()));
    }

    #[test]
    fn includes_model_when_set() {
        let agent = ClaudeAgent::new("LOOP_COMPLETE");
        let args = agent.build_args(&request("task", Some("haiku")));

        assert!(args.contains(&"--model".to_string()));
        assert!(args.contains(&"haiku".to_string()));
    }

    #[test]
    fn prompt_is_last_argument() {
        let agent = ClaudeAgent::new("LOOP_COMPLETE");
        let args = agent.build_args(&request("the prompt", Some("opus")));

        assert_eq!(args.last().unwrap(), "the prompt");
        assert_eq!(args[args.len() - 2], "-p");
    }

    #[test]
    fn custom_cli_path_is_used() {
        let agent = ClaudeAgent::new("LOOP_COMPLETE").with_cli_path("/usr/local/bin/claude");
        assert_eq!(agent.cli_path, "/usr/local/bin/claude");
    }

    /// Writes an executable stand-in agent script.
    #[cfg(unix)]
    fn fake_agent(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-agent.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_detects_marker_from_real_process() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = fake_agent(dir.path(), "echo working\necho LOOP_COMPLETE");

        let agent =
            ClaudeAgent::new("LOOP_COMPLETE").with_cli_path(script.to_string_lossy().to_string());
        let result = agent
            .invoke(request("do the task", None))
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Success);
        assert!(result.completion_signaled);
        assert!(result.output.contains("working"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_reports_failure_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = fake_agent(dir.path(), "echo oops >&2\nexit 3");

        let agent =
            ClaudeAgent::new("LOOP_COMPLETE").with_cli_path(script.to_string_lossy().to_string());
        let result = agent.invoke(request("task", None)).await.unwrap();

        assert_eq!(result.status, InvocationStatus::Failure);
        assert_eq!(result.exit_code, Some(3));
        assert!(result.output.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_times_out_and_kills_the_agent() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = fake_agent(dir.path(), "sleep 30");

        let agent = ClaudeAgent::new("LOOP_COMPLETE")
            .with_cli_path(script.to_string_lossy().to_string())
            .with_total_timeout(Duration::from_millis(200));
        let result = agent.invoke(request("task", None)).await.unwrap();

        assert_eq!(result.status, InvocationStatus::Timeout);
        assert_eq!(result.exit_code, None);
        assert!(!result.completion_signaled);
    }
}
