//! Agent invocation boundary.
//!
//! The loop controller talks to the external coding agent through the
//! [`AgentInvoker`] trait; [`ClaudeAgent`] is the production implementation.

mod claude;

pub use claude::ClaudeAgent;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A single agent invocation request.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// The prompt to send.
    pub prompt: String,
    /// Model alias (e.g., "sonnet", "opus", "haiku").
    pub model: Option<String>,
    /// Working directory the agent mutates.
    pub work_dir: PathBuf,
}

/// Terminal status of one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    /// The agent process exited cleanly.
    Success,
    /// The agent process exited with an error.
    Failure,
    /// The invocation hit the wall-clock limit and was killed.
    Timeout,
}

/// Result of one agent invocation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// How the invocation ended.
    pub status: InvocationStatus,
    /// True when the agent emitted the completion marker on a line of its
    /// own.
    pub completion_signaled: bool,
    /// Captured stdout/stderr.
    pub output: String,
    /// Process exit code, when the process ran to exit.
    pub exit_code: Option<i32>,
}

/// Trait for invoking the external coding agent.
///
/// One call per loop iteration. The controller never issues concurrent
/// invocations: each call mutates the shared working directory and task
/// files, so calls must be serialized.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Runs the agent once and reports the outcome.
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationResult>;

    /// Returns the name of this invoker.
    fn name(&self) -> &str;
}

/// Detects the completion marker in agent output.
///
/// A line signals completion only when its trimmed content equals the marker
/// exactly. Substrings and partial lines never match, so buffered or
/// truncated output cannot produce a false positive.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    marker: String,
}

impl CompletionDetector {
    /// Creates a detector for the given marker.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Returns the marker being matched.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Checks whether a single complete output line signals completion.
    pub fn line_signals(&self, line: &str) -> bool {
        line.trim() == self.marker
    }

    /// Scans a full output buffer line by line.
    pub fn scan(&self, output: &str) -> bool {
        output.lines().any(|line| self.line_signals(line))
    }
}

/// Classification of a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The invocation failed but the workspace is presumed intact; retried
    /// within budget.
    Transient,
    /// The workspace or agent state is no longer trustworthy; the loop stops
    /// immediately.
    Fatal,
}

/// Policy distinguishing transient from fatal agent failures.
///
/// A failure is fatal when any configured substring appears in the output or
/// the exit code is listed; everything else — including timeouts — is
/// transient and retried within budget.
#[derive(Debug, Clone, Default)]
pub struct FailurePolicy {
    fatal_patterns: Vec<String>,
    fatal_exit_codes: Vec<i32>,
}

impl FailurePolicy {
    /// Creates a policy from fatal output patterns and exit codes.
    pub fn new(fatal_patterns: Vec<String>, fatal_exit_codes: Vec<i32>) -> Self {
        Self {
            fatal_patterns,
            fatal_exit_codes,
        }
    }

    /// Classifies a failed invocation.
    pub fn classify(&self, result: &InvocationResult) -> FailureKind {
        if let Some(code) = result.exit_code {
            if self.fatal_exit_codes.contains(&code) {
                return FailureKind::Fatal;
            }
        }
        if self
            .fatal_patterns
            .iter()
            .any(|pattern| result.output.contains(pattern.as_str()))
        {
            return FailureKind::Fatal;
        }
        FailureKind::Transient
    }

    /// Extracts a short human-readable reason from a fatal result.
    pub fn describe(&self, result: &InvocationResult) -> String {
        if let Some(code) = result.exit_code {
            if self.fatal_exit_codes.contains(&code) {
                return format!("agent exited with fatal code {code}");
            }
        }
        for pattern in &self.fatal_patterns {
            if result.output.contains(pattern.as_str()) {
                return format!("agent output matched fatal pattern {pattern:?}");
            }
        }
        match result.status {
            InvocationStatus::Timeout => "agent invocation timed out".to_string(),
            _ => "agent invocation failed".to_string(),
        }
    }
}
