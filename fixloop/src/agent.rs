//! One assistant step: prompt assembly, model call, candidate extraction.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::budget::clip_to_deadline;
use crate::core::extract::candidate_update;
use crate::core::session::SessionState;
use crate::core::state_update::StateDelta;
use crate::core::tool_call::{ToolSpec, tool_specs};
use crate::core::types::{Message, Role};
use crate::io::backend::{BackendError, ModelBackend, ModelRequest};
use crate::io::config::ModelConfig;
use crate::io::prompt::PromptEngine;

/// Reply recorded when a turn is requested after the budget is spent.
pub const BUDGET_EXHAUSTED_REPLY: &str = "Maximum iterations reached. Unable to fix the code.";

/// Retry and deadline settings for model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnConfig {
    pub request_timeout: Duration,
    /// Extra attempts after the first failed call.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl TurnConfig {
    pub fn from_model(config: &ModelConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from_model(&ModelConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model backend unavailable after {attempts} attempts: {source}")]
    BackendUnavailable {
        attempts: u32,
        #[source]
        source: BackendError,
    },
    #[error("session deadline reached before the model call")]
    DeadlineExceeded,
    #[error("turn cancelled")]
    Cancelled,
}

pub struct AgentTurn {
    system: Message,
    tools: Vec<ToolSpec>,
    config: TurnConfig,
}

impl AgentTurn {
    pub fn new(prompts: &PromptEngine, config: TurnConfig) -> anyhow::Result<Self> {
        Ok(Self {
            system: Message::system(prompts.render_system()?),
            tools: tool_specs(),
            config,
        })
    }

    /// Produce the delta for one agent turn.
    ///
    /// Once the budget is spent the turn answers with a terminal message and
    /// never reaches the model.
    #[instrument(skip_all, fields(iteration = state.iterations + 1, max_iterations = state.max_iterations))]
    pub fn run<B: ModelBackend>(
        &self,
        backend: &B,
        state: &SessionState,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<StateDelta, TurnError> {
        if state.budget_exhausted() {
            info!("iteration budget exhausted; skipping model call");
            return Ok(StateDelta {
                messages: vec![Message::assistant(BUDGET_EXHAUSTED_REPLY)],
                is_fixed: Some(false),
                ..StateDelta::default()
            });
        }

        let mut prompt = Vec::with_capacity(state.history.len() + 1);
        prompt.push(self.system.clone());
        prompt.extend(state.history.iter().cloned());

        let mut reply = self.complete_with_retries(backend, &prompt, cancel, deadline)?;
        reply.role = Role::Assistant;
        reply.tool_call_id = None;

        let fixed_code = candidate_update(&reply.content, &state.fixed_code);
        debug!(
            tool_calls = reply.tool_calls.len(),
            new_candidate = fixed_code.is_some(),
            "agent replied"
        );

        Ok(StateDelta {
            messages: vec![reply],
            consumed_iteration: true,
            fixed_code,
            ..StateDelta::default()
        })
    }

    fn complete_with_retries<B: ModelBackend>(
        &self,
        backend: &B,
        prompt: &[Message],
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<Message, TurnError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(TurnError::Cancelled);
            }
            let timeout = clip_to_deadline(self.config.request_timeout, deadline)
                .map_err(|_| TurnError::DeadlineExceeded)?;
            let request = ModelRequest {
                messages: prompt,
                tools: &self.tools,
                timeout,
            };

            match backend.complete(&request) {
                Ok(reply) => return Ok(reply),
                Err(BackendError::Cancelled) => return Err(TurnError::Cancelled),
                Err(err) if err.is_retryable() && attempt <= self.config.max_retries => {
                    warn!(attempt, error = %err, "model call failed; retrying");
                    if !cancel.sleep(self.config.retry_delay) {
                        return Err(TurnError::Cancelled);
                    }
                }
                Err(err) => {
                    return Err(TurnError::BackendUnavailable {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}
