//! Tool execution and autonomous submission of pending candidates.

use std::thread;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::session::SessionState;
use crate::core::state_update::StateDelta;
use crate::core::tool_call::{ToolRequest, parse_tool_call};
use crate::core::types::{AUTO_TEST_CALL_ID, ExecOutcome, Message, Role, SubmissionRecord, ToolCall};
use crate::io::analyzer::ErrorAnalyzer;
use crate::io::sandbox::{ExecRequest, Sandbox};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Cancellation arrived mid-dispatch; the partial results are discarded.
    #[error("dispatch cancelled")]
    Cancelled,
}

pub struct ToolDispatch<'a, S: Sandbox, A: ErrorAnalyzer> {
    sandbox: &'a S,
    analyzer: &'a A,
    stderr_cap_chars: usize,
}

impl<'a, S: Sandbox, A: ErrorAnalyzer> ToolDispatch<'a, S, A> {
    pub fn new(sandbox: &'a S, analyzer: &'a A, stderr_cap_chars: usize) -> Self {
        Self {
            sandbox,
            analyzer,
            stderr_cap_chars,
        }
    }

    /// Answer the latest tool calls, then verify a pending candidate.
    #[instrument(skip_all, fields(submissions = state.submissions.len()))]
    pub fn run(&self, state: &SessionState, cancel: &CancelToken) -> Result<StateDelta, DispatchError> {
        let mut delta = StateDelta::default();

        let calls: &[ToolCall] = match state.last_message() {
            Some(message) if message.role == Role::Assistant => message.tool_calls.as_slice(),
            _ => &[],
        };
        if !calls.is_empty() {
            delta.messages = self.answer_calls(calls, cancel);
        }
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        if let Some(code) = state.pending_candidate() {
            let index = state.next_submission_index();
            let outcome = self
                .sandbox
                .run(&ExecRequest::new(code, state.test_code.as_str()), cancel);
            if matches!(outcome, ExecOutcome::Cancelled) || cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let passed = outcome.passed();
            info!(index, passed, "candidate submitted");
            delta.messages.push(Message::tool(
                AUTO_TEST_CALL_ID,
                submission_feedback(passed, &outcome),
            ));
            delta.submission = Some(SubmissionRecord {
                index,
                code: code.to_string(),
                passed,
                stderr: outcome
                    .error_text()
                    .map(|text| cap_chars(&text, self.stderr_cap_chars)),
                duration_ms: outcome.duration_ms(),
            });
            if state.first_pass.is_none() {
                delta.first_pass = Some(passed);
            }
            delta.is_fixed = Some(passed);
        }

        Ok(delta)
    }

    /// Run every call on its own scoped thread.
    ///
    /// Results come back in request order regardless of completion order, and
    /// a panicking collaborator yields an error result for its call only.
    fn answer_calls(&self, calls: &[ToolCall], cancel: &CancelToken) -> Vec<Message> {
        thread::scope(|scope| {
            let handles: Vec<_> = calls
                .iter()
                .map(|call| scope.spawn(move || self.answer(call, cancel)))
                .collect();
            handles
                .into_iter()
                .zip(calls)
                .map(|(handle, call)| {
                    handle.join().unwrap_or_else(|_| {
                        warn!(call_id = %call.id, tool = %call.name, "tool panicked");
                        Message::tool(&call.id, format!("Error: tool '{}' crashed", call.name))
                    })
                })
                .collect()
        })
    }

    fn answer(&self, call: &ToolCall, cancel: &CancelToken) -> Message {
        let content = match parse_tool_call(call) {
            ToolRequest::AnalyzeError {
                error_message,
                code,
            } => self.analyzer.analyze(&error_message, &code),
            ToolRequest::ExecuteCode { code, test_code } => self
                .sandbox
                .run(&ExecRequest::new(code, test_code), cancel)
                .render(),
            ToolRequest::Rejected { name, reason } => {
                warn!(call_id = %call.id, tool = %name, %reason, "tool call rejected");
                format!("Error: tool call '{name}' rejected: {reason}")
            }
        };
        debug!(call_id = %call.id, tool = %call.name, "tool answered");
        Message::tool(&call.id, content)
    }
}

fn submission_feedback(passed: bool, outcome: &ExecOutcome) -> String {
    if passed {
        format!(
            "Test passed! The fixed code runs successfully.\n\n{}",
            outcome.render()
        )
    } else {
        format!(
            "Test failed. The code still has issues:\n\n{}",
            outcome.render()
        )
    }
}

fn cap_chars(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}
