//! Continuation decision after an agent turn.

use crate::core::session::SessionState;
use crate::core::types::Decision;

/// Pick the next control-loop edge from the current state.
///
/// A turn that neither requested tools nor produced a fresh candidate is a dead
/// end and ends the session.
pub fn decide(state: &SessionState) -> Decision {
    if state.is_fixed || state.budget_exhausted() {
        return Decision::End;
    }

    let requested_tools = state
        .last_message()
        .is_some_and(|message| message.has_tool_calls());
    if requested_tools || state.has_pending_candidate() {
        return Decision::ContinueToTools;
    }

    Decision::End
}
