//! Session state threaded through the repair loop.

use serde::{Deserialize, Serialize};

use crate::core::types::{Message, SubmissionRecord};

/// Mutable record of one repair session.
///
/// Owned by the orchestrator; components never mutate it directly and instead
/// return a [`StateDelta`](crate::core::state_update::StateDelta).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Append-only conversation history.
    pub history: Vec<Message>,
    /// Agent turns that reached the model.
    pub iterations: u32,
    pub max_iterations: u32,
    pub original_code: String,
    pub test_code: String,
    /// Current candidate fix. Empty until the agent emits one.
    pub fixed_code: String,
    /// Append-only verification attempts.
    pub submissions: Vec<SubmissionRecord>,
    /// Index of the last submission, `-1` before the first.
    pub submit_counter: i64,
    /// Outcome of the first submission of the session.
    pub first_pass: Option<bool>,
    /// Whether the most recent submission passed.
    pub is_fixed: bool,
}

impl SessionState {
    /// Create a fresh session whose history holds only the task message.
    pub fn new(
        original_code: impl Into<String>,
        test_code: impl Into<String>,
        max_iterations: u32,
        task: Message,
    ) -> Self {
        Self {
            history: vec![task],
            iterations: 0,
            max_iterations,
            original_code: original_code.into(),
            test_code: test_code.into(),
            fixed_code: String::new(),
            submissions: Vec::new(),
            submit_counter: -1,
            first_pass: None,
            is_fixed: false,
        }
    }

    /// The candidate awaiting verification, if any.
    ///
    /// A candidate is pending when it is non-empty and differs from the code of
    /// the most recent submission.
    pub fn pending_candidate(&self) -> Option<&str> {
        if self.fixed_code.is_empty() {
            return None;
        }
        match self.submissions.last() {
            Some(last) if last.code == self.fixed_code => None,
            _ => Some(&self.fixed_code),
        }
    }

    pub fn has_pending_candidate(&self) -> bool {
        self.pending_candidate().is_some()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iterations >= self.max_iterations
    }

    /// Index the next submission will receive.
    pub fn next_submission_index(&self) -> u32 {
        u32::try_from(self.submit_counter + 1).unwrap_or(0)
    }
}

/// Check session invariants and return human-readable violations.
///
/// An empty result means the state is consistent.
pub fn validate_invariants(state: &SessionState) -> Vec<String> {
    let mut errors = Vec::new();

    if state.max_iterations == 0 {
        errors.push("max_iterations must be > 0".to_string());
    }
    if state.iterations > state.max_iterations {
        errors.push(format!(
            "iterations {} exceeds max_iterations {}",
            state.iterations, state.max_iterations
        ));
    }

    for (position, record) in state.submissions.iter().enumerate() {
        if record.index as usize != position {
            errors.push(format!(
                "submission at position {position} has index {}",
                record.index
            ));
        }
    }

    let expected_counter = state.submissions.len() as i64 - 1;
    if state.submit_counter != expected_counter {
        errors.push(format!(
            "submit_counter {} does not match {} submissions",
            state.submit_counter,
            state.submissions.len()
        ));
    }

    if state.is_fixed && !state.submissions.last().is_some_and(|last| last.passed) {
        errors.push("is_fixed set without a passing last submission".to_string());
    }

    match (state.first_pass, state.submissions.first()) {
        (Some(first_pass), Some(first)) if first_pass != first.passed => {
            errors.push(format!(
                "first_pass {first_pass} disagrees with first submission passed={}",
                first.passed
            ));
        }
        (Some(_), None) => errors.push("first_pass set without submissions".to_string()),
        (None, Some(_)) => errors.push("first_pass unset after a submission".to_string()),
        _ => {}
    }

    errors
}
