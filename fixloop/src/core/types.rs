//! Shared deterministic types for the repair loop.
//!
//! These types define stable contracts between the loop components and the
//! collaborators behind them. They carry no I/O and serialize deterministically
//! so session transcripts stay reproducible.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlation id used for feedback from autonomous submissions.
pub const AUTO_TEST_CALL_ID: &str = "auto_test";

/// Author of a history message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Assistant,
    Tool,
}

/// A capability invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id used to correlate the tool result with this request.
    pub id: String,
    pub name: String,
    /// Structured arguments. Non-object values are rejected at dispatch.
    pub arguments: Value,
}

/// One entry of the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool results; matches the originating [`ToolCall::id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One verification attempt of a candidate against the test script.
///
/// Records are immutable once appended to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub index: u32,
    pub code: String,
    pub passed: bool,
    pub stderr: Option<String>,
    pub duration_ms: Option<f64>,
}

/// Next control-loop edge chosen after an agent turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ContinueToTools,
    End,
}

/// Structured result of a sandboxed run that completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecReport {
    /// `exit_code == 0`.
    pub passed: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: f64,
}

/// Outcome of one sandbox invocation.
///
/// Only [`ExecOutcome::Completed`] with a zero exit status counts as passing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecOutcome {
    Completed(ExecReport),
    TimedOut {
        timeout_secs: u64,
        stdout: String,
        stderr: String,
        duration_ms: f64,
    },
    LaunchFailed {
        error: String,
    },
    Cancelled,
}

impl ExecOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, ExecOutcome::Completed(report) if report.passed && report.exit_code == 0)
    }

    pub fn duration_ms(&self) -> Option<f64> {
        match self {
            ExecOutcome::Completed(report) => Some(report.duration_ms),
            ExecOutcome::TimedOut { duration_ms, .. } => Some(*duration_ms),
            ExecOutcome::LaunchFailed { .. } | ExecOutcome::Cancelled => None,
        }
    }

    /// Error text worth recording for the agent, if any.
    ///
    /// Executor-level failures always produce text so a failed submission is
    /// never recorded without an explanation.
    pub fn error_text(&self) -> Option<String> {
        match self {
            ExecOutcome::Completed(report) => {
                let stderr = report.stderr.trim();
                (!stderr.is_empty()).then(|| stderr.to_string())
            }
            ExecOutcome::TimedOut {
                timeout_secs,
                stderr,
                ..
            } => {
                let mut text =
                    format!("ERROR: Code execution timed out ({timeout_secs} seconds limit)");
                if !stderr.trim().is_empty() {
                    text.push('\n');
                    text.push_str(stderr.trim());
                }
                Some(text)
            }
            ExecOutcome::LaunchFailed { error } => Some(format!("ERROR: {error}")),
            ExecOutcome::Cancelled => Some("ERROR: execution cancelled".to_string()),
        }
    }

    /// Render the outcome as plain text for the model.
    pub fn render(&self) -> String {
        match self {
            ExecOutcome::Completed(report) => {
                let mut sections = Vec::new();
                if !report.stdout.is_empty() {
                    sections.push(format!("STDOUT:\n{}", report.stdout));
                }
                if !report.stderr.is_empty() {
                    sections.push(format!("STDERR:\n{}", report.stderr));
                }
                sections.push(format!("EXIT_CODE: {}", report.exit_code));
                sections.join("\n")
            }
            other => other.error_text().unwrap_or_default(),
        }
    }
}
