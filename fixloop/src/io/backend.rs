//! Model backend abstraction for agent turns.
//!
//! The [`ModelBackend`] trait decouples the agent turn from any live model.
//! Tests use scripted backends that return predetermined replies.

use std::time::Duration;

use thiserror::Error;

use crate::core::tool_call::ToolSpec;
use crate::core::types::Message;

/// One completion request.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    /// Full prompt: fixed instruction followed by the session history.
    pub messages: &'a [Message],
    /// Tools the model may call.
    pub tools: &'a [ToolSpec],
    /// Deadline for this call.
    pub timeout: Duration,
}

/// Failure of a single backend call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited by backend")]
    RateLimited,
    #[error("backend returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("request cancelled")]
    Cancelled,
}

impl BackendError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Transport(_)
            | BackendError::Timeout(_)
            | BackendError::RateLimited
            | BackendError::Malformed(_) => true,
            BackendError::Api { status, .. } => *status >= 500,
            BackendError::Cancelled => false,
        }
    }
}

/// Chat model with tool calling.
pub trait ModelBackend {
    /// Produce one assistant message for `request`.
    ///
    /// Tool calls in the reply must carry ids unique within the session.
    fn complete(&self, request: &ModelRequest<'_>) -> Result<Message, BackendError>;
}
