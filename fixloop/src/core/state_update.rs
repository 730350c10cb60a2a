//! Orchestrator-owned merging of component deltas into session state.

use crate::core::session::SessionState;
use crate::core::types::{Message, SubmissionRecord};

/// Fields changed by one component step.
///
/// Components build deltas from a read-only view of the state; only
/// [`apply_delta`] writes them back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    /// Messages to append to the history, in order.
    pub messages: Vec<Message>,
    /// Whether this step consumed one iteration of the budget.
    pub consumed_iteration: bool,
    /// New candidate fix.
    pub fixed_code: Option<String>,
    /// New verification attempt.
    pub submission: Option<SubmissionRecord>,
    pub first_pass: Option<bool>,
    pub is_fixed: Option<bool>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self == &StateDelta::default()
    }
}

/// Summary of a merged delta, for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaSummary {
    pub messages_appended: usize,
    /// Iteration count after the merge, when the delta consumed one.
    pub iteration: Option<u32>,
    pub fixed_code_updated: bool,
    pub submission_index: Option<u32>,
    pub first_pass_set: bool,
}

/// Merge `delta` into `state`.
///
/// The delta is checked in full before anything is written, so a rejected
/// delta leaves `state` untouched. Rejections indicate a component bug.
pub fn apply_delta(state: &mut SessionState, delta: StateDelta) -> Result<DeltaSummary, String> {
    check_delta(state, &delta)?;

    let StateDelta {
        messages,
        consumed_iteration,
        fixed_code,
        submission,
        first_pass,
        is_fixed,
    } = delta;

    let mut summary = DeltaSummary {
        messages_appended: messages.len(),
        iteration: None,
        fixed_code_updated: false,
        submission_index: None,
        first_pass_set: false,
    };

    state.history.extend(messages);

    if consumed_iteration {
        state.iterations += 1;
        summary.iteration = Some(state.iterations);
    }

    if let Some(code) = fixed_code
        && code != state.fixed_code
    {
        state.fixed_code = code;
        summary.fixed_code_updated = true;
    }

    if let Some(record) = submission {
        state.submit_counter = i64::from(record.index);
        summary.submission_index = Some(record.index);
        state.submissions.push(record);
    }

    if let Some(passed) = first_pass {
        state.first_pass = Some(passed);
        summary.first_pass_set = true;
    }

    if let Some(fixed) = is_fixed {
        state.is_fixed = fixed;
    }

    Ok(summary)
}

fn check_delta(state: &SessionState, delta: &StateDelta) -> Result<(), String> {
    if delta.consumed_iteration && state.budget_exhausted() {
        return Err(format!(
            "iteration budget exhausted ({}/{})",
            state.iterations, state.max_iterations
        ));
    }

    if let Some(code) = &delta.fixed_code
        && code.trim().is_empty()
    {
        return Err("fixed_code must not be cleared".to_string());
    }

    if let Some(record) = &delta.submission {
        let expected = state.next_submission_index();
        if record.index != expected {
            return Err(format!(
                "submission index {} out of order (expected {expected})",
                record.index
            ));
        }
    }

    if let Some(passed) = delta.first_pass {
        if state.first_pass.is_some() {
            return Err("first_pass is already set for this session".to_string());
        }
        let Some(record) = &delta.submission else {
            return Err("first_pass requires a submission".to_string());
        };
        if state.next_submission_index() != 0 || record.passed != passed {
            return Err("first_pass must match the first submission".to_string());
        }
    }

    if delta.is_fixed == Some(true) {
        let last_passed = delta
            .submission
            .as_ref()
            .or(state.submissions.last())
            .is_some_and(|record| record.passed);
        if !last_passed {
            return Err("is_fixed requires a passing last submission".to_string());
        }
    }

    Ok(())
}
