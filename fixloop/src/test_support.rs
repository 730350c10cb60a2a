//! Test-only helpers: deterministic sessions and scripted collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::Value;

use crate::cancel::CancelToken;
use crate::core::extract::{FIX_END, FIX_START};
use crate::core::session::SessionState;
use crate::core::types::{ExecOutcome, ExecReport, Message, SubmissionRecord, ToolCall};
use crate::io::backend::{BackendError, ModelBackend, ModelRequest};
use crate::io::sandbox::{ExecRequest, Sandbox};

pub const ORIGINAL_CODE: &str = "def add(a, b):\n    return a - b\n";
pub const TEST_CODE: &str = "assert add(1, 2) == 3\n";
pub const FIXED_CODE: &str = "def add(a, b):\n    return a + b\n";

/// Fresh session over the canned `add` bug.
pub fn session(max_iterations: u32) -> SessionState {
    SessionState::new(
        ORIGINAL_CODE,
        TEST_CODE,
        max_iterations,
        Message::system("Fix the code."),
    )
}

/// Submission record with no stderr unless it failed.
pub fn record(index: u32, code: &str, passed: bool) -> SubmissionRecord {
    SubmissionRecord {
        index,
        code: code.to_string(),
        passed,
        stderr: (!passed).then(|| "AssertionError".to_string()),
        duration_ms: Some(5.0),
    }
}

pub fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Assistant reply proposing `code` between the fix markers.
pub fn fix_reply(code: &str) -> Message {
    Message::assistant(format!(
        "Here is the fix.\n\n{FIX_START}\n{code}\n{FIX_END}"
    ))
}

pub fn passed(stdout: &str) -> ExecOutcome {
    ExecOutcome::Completed(ExecReport {
        passed: true,
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
        duration_ms: 7.0,
    })
}

pub fn failed(stderr: &str) -> ExecOutcome {
    ExecOutcome::Completed(ExecReport {
        passed: false,
        exit_code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
        duration_ms: 9.0,
    })
}

pub fn timed_out(timeout_secs: u64) -> ExecOutcome {
    ExecOutcome::TimedOut {
        timeout_secs,
        stdout: String::new(),
        stderr: String::new(),
        duration_ms: (timeout_secs * 1000) as f64,
    }
}

/// Backend that replays queued replies and records every prompt it saw.
///
/// Once the script runs out it fails with a non-retryable API error.
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<Message, BackendError>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<Message, BackendError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(replies: Vec<Message>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

impl ModelBackend for ScriptedBackend {
    fn complete(&self, request: &ModelRequest<'_>) -> Result<Message, BackendError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.messages.to_vec());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(BackendError::Api {
                    status: 400,
                    body: "scripted backend exhausted".to_string(),
                })
            })
    }
}

/// Sandbox that replays queued outcomes and records every request.
pub struct ScriptedSandbox {
    outcomes: Mutex<VecDeque<ExecOutcome>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedSandbox {
    pub fn new(outcomes: Vec<ExecOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, request: &ExecRequest, _cancel: &CancelToken) -> ExecOutcome {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or_else(|| ExecOutcome::LaunchFailed {
                error: "scripted sandbox exhausted".to_string(),
            })
    }
}
