//! Session driver: agent turn, decision, tool dispatch, repeat.
//!
//! The orchestrator owns the [`SessionState`] and is the only code that
//! writes to it. Each component returns a [`StateDelta`] which is merged via
//! [`apply_delta`] and then re-checked against the session invariants.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::agent::{AgentTurn, TurnConfig, TurnError};
use crate::cancel::CancelToken;
use crate::core::decision::decide;
use crate::core::session::{SessionState, validate_invariants};
use crate::core::state_update::{DeltaSummary, StateDelta, apply_delta};
use crate::core::types::{Decision, Message};
use crate::dispatch::{DispatchError, ToolDispatch};
use crate::io::analyzer::ErrorAnalyzer;
use crate::io::backend::{BackendError, ModelBackend};
use crate::io::config::FixloopConfig;
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::Sandbox;

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Input of one repair session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub original_code: String,
    pub test_code: String,
    pub max_iterations: u32,
}

impl SessionRequest {
    pub fn new(original_code: impl Into<String>, test_code: impl Into<String>) -> Self {
        Self {
            original_code: original_code.into(),
            test_code: test_code.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Reason why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStop {
    /// The latest submission passed the tests.
    Fixed,
    /// `max_iterations` agent turns reached the model without a passing fix.
    BudgetExhausted,
    /// The agent neither requested tools nor proposed a new candidate.
    DeadEnd,
    Cancelled,
    /// `session_timeout_secs` elapsed before the next model call.
    TimedOut,
}

impl SessionStop {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStop::Fixed => "fixed",
            SessionStop::BudgetExhausted => "budget_exhausted",
            SessionStop::DeadEnd => "dead_end",
            SessionStop::Cancelled => "cancelled",
            SessionStop::TimedOut => "timed_out",
        }
    }
}

/// Terminal state of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub stop: SessionStop,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session request: {0}")]
    InvalidRequest(String),
    /// The model stayed unreachable; `state` is the last consistent state.
    #[error("model backend unavailable after {attempts} attempts: {source}")]
    BackendUnavailable {
        attempts: u32,
        #[source]
        source: BackendError,
        state: Box<SessionState>,
    },
    #[error("inconsistent state update: {0}")]
    InconsistentDelta(String),
    #[error("render prompt: {0:#}")]
    Prompt(anyhow::Error),
}

/// Progress notifications emitted after each merged delta.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    AgentTurn {
        iteration: u32,
        tool_calls: usize,
        new_candidate: bool,
    },
    ToolsAnswered {
        results: usize,
        submission: Option<(u32, bool)>,
    },
}

/// Settings that stay fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub turn: TurnConfig,
    pub stderr_cap_chars: usize,
    pub session_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn from_config(config: &FixloopConfig) -> Self {
        Self {
            turn: TurnConfig::from_model(&config.model),
            stderr_cap_chars: config.sandbox.stderr_cap_chars,
            session_timeout: config.session_timeout(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&FixloopConfig::default())
    }
}

/// Repair loop over injected collaborators.
pub struct Orchestrator<'a, B: ModelBackend, S: Sandbox, A: ErrorAnalyzer> {
    backend: &'a B,
    sandbox: &'a S,
    analyzer: &'a A,
    options: SessionOptions,
    prompts: PromptEngine,
}

impl<'a, B: ModelBackend, S: Sandbox, A: ErrorAnalyzer> Orchestrator<'a, B, S, A> {
    pub fn new(backend: &'a B, sandbox: &'a S, analyzer: &'a A, options: SessionOptions) -> Self {
        Self {
            backend,
            sandbox,
            analyzer,
            options,
            prompts: PromptEngine::new(),
        }
    }

    /// Run one session to a terminal state.
    ///
    /// At most `request.max_iterations` agent turns reach the model. The only
    /// hard failure is an unreachable backend; budget exhaustion, dead ends,
    /// timeouts and cancellation all return an outcome.
    #[instrument(skip_all, fields(max_iterations = request.max_iterations))]
    pub fn run<F: FnMut(&SessionEvent)>(
        &self,
        request: &SessionRequest,
        cancel: &CancelToken,
        mut on_event: F,
    ) -> Result<SessionOutcome, SessionError> {
        if request.max_iterations == 0 {
            return Err(SessionError::InvalidRequest(
                "max_iterations must be > 0".to_string(),
            ));
        }

        let started = Instant::now();
        let deadline = self.options.session_timeout.map(|timeout| started + timeout);
        let agent = AgentTurn::new(&self.prompts, self.options.turn).map_err(SessionError::Prompt)?;
        let dispatch = ToolDispatch::new(self.sandbox, self.analyzer, self.options.stderr_cap_chars);
        let task = self
            .prompts
            .render_task(&request.original_code, &request.test_code)
            .map_err(SessionError::Prompt)?;
        let mut state = SessionState::new(
            request.original_code.as_str(),
            request.test_code.as_str(),
            request.max_iterations,
            Message::system(task),
        );

        let finish = |state: SessionState, stop: SessionStop| {
            info!(
                stop = stop.as_str(),
                iterations = state.iterations,
                submissions = state.submissions.len(),
                "session finished"
            );
            SessionOutcome {
                state,
                stop,
                elapsed: started.elapsed(),
            }
        };

        loop {
            let delta = match agent.run(self.backend, &state, cancel, deadline) {
                Ok(delta) => delta,
                Err(TurnError::Cancelled) => return Ok(finish(state, SessionStop::Cancelled)),
                Err(TurnError::DeadlineExceeded) => {
                    return Ok(finish(state, SessionStop::TimedOut));
                }
                Err(TurnError::BackendUnavailable { attempts, source }) => {
                    warn!(attempts, error = %source, "giving up on model backend");
                    return Err(SessionError::BackendUnavailable {
                        attempts,
                        source,
                        state: Box::new(state),
                    });
                }
            };

            let reached_model = delta.consumed_iteration;
            let tool_calls = delta.messages.first().map_or(0, |m| m.tool_calls.len());
            let summary = merge(&mut state, delta)?;
            if !reached_model {
                return Ok(finish(state, SessionStop::BudgetExhausted));
            }
            on_event(&SessionEvent::AgentTurn {
                iteration: state.iterations,
                tool_calls,
                new_candidate: summary.fixed_code_updated,
            });

            match decide(&state) {
                Decision::ContinueToTools => {}
                Decision::End => {
                    let stop = if state.is_fixed {
                        SessionStop::Fixed
                    } else if state.budget_exhausted() {
                        SessionStop::BudgetExhausted
                    } else {
                        SessionStop::DeadEnd
                    };
                    return Ok(finish(state, stop));
                }
            }

            let delta = match dispatch.run(&state, cancel) {
                Ok(delta) => delta,
                Err(DispatchError::Cancelled) => return Ok(finish(state, SessionStop::Cancelled)),
            };
            let summary = merge(&mut state, delta)?;
            on_event(&SessionEvent::ToolsAnswered {
                results: summary.messages_appended,
                submission: summary
                    .submission_index
                    .map(|index| (index, state.is_fixed)),
            });

            if state.is_fixed {
                return Ok(finish(state, SessionStop::Fixed));
            }
        }
    }
}

fn merge(state: &mut SessionState, delta: StateDelta) -> Result<DeltaSummary, SessionError> {
    let summary = apply_delta(state, delta).map_err(SessionError::InconsistentDelta)?;
    let violations = validate_invariants(state);
    if !violations.is_empty() {
        return Err(SessionError::InconsistentDelta(violations.join("; ")));
    }
    debug!(?summary, "delta merged");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::analyzer::PatternAnalyzer;
    use crate::test_support::{
        FIXED_CODE, ORIGINAL_CODE, ScriptedBackend, ScriptedSandbox, TEST_CODE, fix_reply, passed,
    };

    fn request(max_iterations: u32) -> SessionRequest {
        SessionRequest::new(ORIGINAL_CODE, TEST_CODE).with_max_iterations(max_iterations)
    }

    #[test]
    fn zero_budget_is_rejected() {
        let backend = ScriptedBackend::replying(Vec::new());
        let sandbox = ScriptedSandbox::new(Vec::new());
        let orchestrator =
            Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, SessionOptions::default());

        let err = orchestrator
            .run(&request(0), &CancelToken::new(), |_| {})
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn task_message_seeds_history() {
        let backend = ScriptedBackend::replying(vec![Message::assistant("no idea")]);
        let sandbox = ScriptedSandbox::new(Vec::new());
        let orchestrator =
            Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, SessionOptions::default());

        let outcome = orchestrator
            .run(&request(3), &CancelToken::new(), |_| {})
            .expect("session");

        assert_eq!(outcome.stop, SessionStop::DeadEnd);
        assert_eq!(outcome.state.iterations, 1);
        assert_eq!(outcome.state.history.len(), 2);
        assert!(outcome.state.history[0].content.contains("return a - b"));
    }

    #[test]
    fn events_follow_the_loop() {
        let backend = ScriptedBackend::replying(vec![fix_reply(FIXED_CODE)]);
        let sandbox = ScriptedSandbox::new(vec![passed("")]);
        let orchestrator =
            Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, SessionOptions::default());

        let mut events = Vec::new();
        let outcome = orchestrator
            .run(&request(3), &CancelToken::new(), |event| {
                events.push(event.clone());
            })
            .expect("session");

        assert_eq!(outcome.stop, SessionStop::Fixed);
        assert_eq!(
            events,
            vec![
                SessionEvent::AgentTurn {
                    iteration: 1,
                    tool_calls: 0,
                    new_candidate: true,
                },
                SessionEvent::ToolsAnswered {
                    results: 1,
                    submission: Some((0, true)),
                },
            ]
        );
    }

    #[test]
    fn session_timeout_stops_before_model_call() {
        let backend = ScriptedBackend::replying(vec![Message::assistant("unused")]);
        let sandbox = ScriptedSandbox::new(Vec::new());
        let options = SessionOptions {
            session_timeout: Some(Duration::ZERO),
            ..SessionOptions::default()
        };
        let orchestrator = Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, options);

        let outcome = orchestrator
            .run(&request(3), &CancelToken::new(), |_| {})
            .expect("session");
        assert_eq!(outcome.stop, SessionStop::TimedOut);
        assert_eq!(backend.calls(), 0);
    }
}
