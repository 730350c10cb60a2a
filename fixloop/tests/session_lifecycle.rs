//! Session-level tests driving the orchestrator with scripted collaborators.
//!
//! Each test scripts the model replies and sandbox outcomes, runs one session
//! to completion, and checks the terminal state plus the session invariants.

use std::time::Duration;

use fixloop::agent::TurnConfig;
use fixloop::cancel::CancelToken;
use fixloop::core::session::{SessionState, validate_invariants};
use fixloop::core::tool_call::{CODE_EXECUTOR, ERROR_ANALYZER};
use fixloop::core::types::{AUTO_TEST_CALL_ID, ExecOutcome, Message, Role};
use fixloop::io::analyzer::PatternAnalyzer;
use fixloop::io::backend::BackendError;
use fixloop::io::sandbox::ExecRequest;
use fixloop::orchestrator::{
    Orchestrator, SessionError, SessionOptions, SessionOutcome, SessionRequest, SessionStop,
};
use fixloop::test_support::{
    FIXED_CODE, ORIGINAL_CODE, ScriptedBackend, ScriptedSandbox, TEST_CODE, call, failed,
    fix_reply, passed, timed_out,
};
use serde_json::json;

fn options() -> SessionOptions {
    SessionOptions {
        turn: TurnConfig {
            request_timeout: Duration::from_secs(5),
            max_retries: 2,
            retry_delay: Duration::ZERO,
        },
        stderr_cap_chars: 2000,
        session_timeout: None,
    }
}

fn request(max_iterations: u32) -> SessionRequest {
    SessionRequest::new(ORIGINAL_CODE, TEST_CODE).with_max_iterations(max_iterations)
}

fn run(
    backend: &ScriptedBackend,
    sandbox: &ScriptedSandbox,
    max_iterations: u32,
) -> SessionOutcome {
    let outcome = Orchestrator::new(backend, sandbox, &PatternAnalyzer, options())
        .run(&request(max_iterations), &CancelToken::new(), |_| {})
        .expect("session");
    assert_consistent(&outcome.state);
    outcome
}

fn assert_consistent(state: &SessionState) {
    let violations = validate_invariants(state);
    assert!(violations.is_empty(), "invariant violations: {violations:?}");
    assert!(state.iterations <= state.max_iterations);
}

fn executor_call(id: &str) -> Message {
    Message::assistant_with_calls(
        "Let me run the tests.",
        vec![call(
            id,
            CODE_EXECUTOR,
            json!({"code": ORIGINAL_CODE, "test_code": TEST_CODE}),
        )],
    )
}

/// Budget of two, the model keeps calling tools and never proposes a fix.
#[test]
fn budget_exhaustion_stops_after_max_iterations() {
    let backend = ScriptedBackend::replying(vec![
        executor_call("call-1"),
        executor_call("call-2"),
        executor_call("call-3"),
    ]);
    let sandbox = ScriptedSandbox::new(vec![failed("AssertionError"), failed("AssertionError")]);

    let outcome = run(&backend, &sandbox, 2);

    assert_eq!(outcome.stop, SessionStop::BudgetExhausted);
    assert_eq!(outcome.state.iterations, 2);
    assert_eq!(backend.calls(), 2);
    assert!(!outcome.state.is_fixed);
    assert!(outcome.state.submissions.is_empty());
    assert_eq!(outcome.state.first_pass, None);
}

#[test]
fn first_try_success() {
    let backend = ScriptedBackend::replying(vec![fix_reply(FIXED_CODE)]);
    let sandbox = ScriptedSandbox::new(vec![passed("")]);

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::Fixed);
    assert!(outcome.state.is_fixed);
    assert_eq!(outcome.state.first_pass, Some(true));
    assert_eq!(outcome.state.iterations, 1);
    assert_eq!(outcome.state.submissions.len(), 1);
    assert_eq!(outcome.state.submit_counter, 0);
    assert_eq!(outcome.state.fixed_code, FIXED_CODE.trim());
    assert_eq!(
        sandbox.requests(),
        vec![ExecRequest::new(FIXED_CODE.trim(), TEST_CODE)]
    );

    let history = &outcome.state.history;
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].role, Role::Tool);
    assert_eq!(history[2].tool_call_id.as_deref(), Some(AUTO_TEST_CALL_ID));
}

#[test]
fn fail_then_fix_keeps_first_pass_false() {
    let backend = ScriptedBackend::replying(vec![
        fix_reply("def add(a, b):\n    return a * b"),
        fix_reply(FIXED_CODE),
    ]);
    let sandbox = ScriptedSandbox::new(vec![failed("AssertionError"), passed("")]);

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::Fixed);
    assert_eq!(outcome.state.iterations, 2);
    assert_eq!(outcome.state.first_pass, Some(false));
    let submissions = &outcome.state.submissions;
    assert_eq!(submissions.len(), 2);
    assert_eq!((submissions[0].index, submissions[0].passed), (0, false));
    assert_eq!((submissions[1].index, submissions[1].passed), (1, true));
    assert_eq!(submissions[0].stderr.as_deref(), Some("AssertionError"));

    // The second model call saw the failure feedback.
    let second_prompt = &backend.prompts()[1];
    let feedback = second_prompt.last().expect("feedback");
    assert_eq!(feedback.tool_call_id.as_deref(), Some(AUTO_TEST_CALL_ID));
    assert!(feedback.content.starts_with("Test failed."));
}

#[test]
fn executor_timeout_is_recorded_and_session_continues() {
    let backend = ScriptedBackend::replying(vec![
        fix_reply("def add(a, b):\n    while True:\n        pass"),
        fix_reply(FIXED_CODE),
    ]);
    let sandbox = ScriptedSandbox::new(vec![timed_out(10), passed("")]);

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::Fixed);
    let first = &outcome.state.submissions[0];
    assert!(!first.passed);
    assert!(
        first
            .stderr
            .as_deref()
            .expect("stderr")
            .contains("timed out (10 seconds limit)")
    );
    assert_eq!(outcome.state.first_pass, Some(false));
}

/// Repeating an already-submitted candidate does not submit it again.
#[test]
fn identical_candidate_is_submitted_once() {
    let repeated = "def add(a, b):\n    return b - a";
    let mut again = fix_reply(repeated);
    again.tool_calls = vec![call(
        "call-1",
        ERROR_ANALYZER,
        json!({"error_message": "AssertionError", "code": repeated}),
    )];
    let backend = ScriptedBackend::replying(vec![
        fix_reply(repeated),
        again,
        Message::assistant("I am out of ideas."),
    ]);
    let sandbox = ScriptedSandbox::new(vec![failed("AssertionError")]);

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::DeadEnd);
    assert_eq!(outcome.state.iterations, 3);
    assert_eq!(outcome.state.submissions.len(), 1);
    assert_eq!(sandbox.requests().len(), 1);
}

#[test]
fn malformed_tool_calls_get_rejections() {
    let backend = ScriptedBackend::replying(vec![
        Message::assistant_with_calls(
            "",
            vec![
                call("call-1", "run_shell", json!({"cmd": "rm -rf /"})),
                call("call-2", CODE_EXECUTOR, json!({"source": "print(1)"})),
            ],
        ),
        fix_reply(FIXED_CODE),
    ]);
    let sandbox = ScriptedSandbox::new(vec![passed("")]);

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::Fixed);
    let rejections: Vec<&Message> = outcome
        .state
        .history
        .iter()
        .filter(|m| m.role == Role::Tool && m.content.contains("rejected"))
        .collect();
    assert_eq!(rejections.len(), 2);
    assert_eq!(rejections[0].tool_call_id.as_deref(), Some("call-1"));
    assert_eq!(rejections[1].tool_call_id.as_deref(), Some("call-2"));
    // Only the autonomous submission reached the sandbox.
    assert_eq!(sandbox.requests().len(), 1);
}

#[test]
fn dead_end_without_tools_or_candidate() {
    let backend = ScriptedBackend::replying(vec![Message::assistant("The code looks fine.")]);
    let sandbox = ScriptedSandbox::new(Vec::new());

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::DeadEnd);
    assert_eq!(outcome.state.iterations, 1);
    assert!(sandbox.requests().is_empty());
}

#[test]
fn transient_backend_failures_do_not_consume_budget() {
    let backend = ScriptedBackend::new(vec![
        Err(BackendError::Timeout(Duration::from_secs(5))),
        Err(BackendError::Api {
            status: 502,
            body: "bad gateway".to_string(),
        }),
        Ok(fix_reply(FIXED_CODE)),
    ]);
    let sandbox = ScriptedSandbox::new(vec![passed("")]);

    let outcome = run(&backend, &sandbox, 2);

    assert_eq!(outcome.stop, SessionStop::Fixed);
    assert_eq!(outcome.state.iterations, 1);
    assert_eq!(backend.calls(), 3);
}

/// The turn that spends the last iteration ends the session before its
/// candidate reaches the sandbox.
#[test]
fn candidate_on_final_turn_is_not_submitted() {
    let backend = ScriptedBackend::replying(vec![fix_reply(FIXED_CODE)]);
    let sandbox = ScriptedSandbox::new(vec![passed("")]);

    let outcome = run(&backend, &sandbox, 1);

    assert_eq!(outcome.stop, SessionStop::BudgetExhausted);
    assert_eq!(outcome.state.iterations, 1);
    assert_eq!(outcome.state.fixed_code, FIXED_CODE.trim());
    assert!(outcome.state.submissions.is_empty());
    assert_eq!(outcome.state.first_pass, None);
    assert!(!outcome.state.is_fixed);
    assert!(sandbox.requests().is_empty());
}

#[test]
fn exhausted_retries_return_last_consistent_state() {
    let backend = ScriptedBackend::new(vec![
        Ok(fix_reply("def add(a, b):\n    return 0")),
        Err(BackendError::Transport("connection refused".to_string())),
        Err(BackendError::Transport("connection refused".to_string())),
        Err(BackendError::Transport("connection refused".to_string())),
    ]);
    let sandbox = ScriptedSandbox::new(vec![failed("AssertionError")]);

    let err = Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, options())
        .run(&request(5), &CancelToken::new(), |_| {})
        .unwrap_err();

    match err {
        SessionError::BackendUnavailable {
            attempts, state, ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(state.iterations, 1);
            assert_eq!(state.submissions.len(), 1);
            assert_consistent(&state);
        }
        other => panic!("expected backend unavailable, got {other:?}"),
    }
}

#[test]
fn cancelled_before_start_never_calls_the_model() {
    let backend = ScriptedBackend::replying(vec![fix_reply(FIXED_CODE)]);
    let sandbox = ScriptedSandbox::new(vec![passed("")]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, options())
        .run(&request(5), &cancel, |_| {})
        .expect("session");

    assert_eq!(outcome.stop, SessionStop::Cancelled);
    assert_eq!(backend.calls(), 0);
    assert_eq!(outcome.state.iterations, 0);
    assert_consistent(&outcome.state);
}

#[test]
fn cancelled_submission_records_nothing() {
    let backend = ScriptedBackend::replying(vec![fix_reply(FIXED_CODE)]);
    let sandbox = ScriptedSandbox::new(vec![ExecOutcome::Cancelled]);

    let outcome = run(&backend, &sandbox, 5);

    assert_eq!(outcome.stop, SessionStop::Cancelled);
    assert_eq!(outcome.state.iterations, 1);
    assert!(outcome.state.submissions.is_empty());
    assert_eq!(outcome.state.first_pass, None);
    assert!(!outcome.state.is_fixed);
}

/// Full loop against the real process sandbox, with `sh` standing in for Python.
#[cfg(unix)]
#[test]
fn real_sandbox_verifies_candidate() {
    use fixloop::io::config::SandboxConfig;
    use fixloop::io::sandbox::PythonSandbox;

    let buggy = "add() { echo $(( $1 - $2 )); }";
    let fixed = "add() { echo $(( $1 + $2 )); }";
    let tests = "[ \"$(add 1 2)\" = 3 ]";
    let sandbox = PythonSandbox::new(&SandboxConfig {
        interpreter: vec!["sh".to_string()],
        timeout_secs: 5,
        ..SandboxConfig::default()
    });
    let backend = ScriptedBackend::replying(vec![fix_reply(buggy), fix_reply(fixed)]);

    let outcome = Orchestrator::new(&backend, &sandbox, &PatternAnalyzer, options())
        .run(
            &SessionRequest::new(buggy, tests).with_max_iterations(3),
            &CancelToken::new(),
            |_| {},
        )
        .expect("session");

    assert_consistent(&outcome.state);
    assert_eq!(outcome.stop, SessionStop::Fixed);
    assert_eq!(outcome.state.first_pass, Some(false));
    assert_eq!(outcome.state.submissions.len(), 2);
    assert_eq!(outcome.state.fixed_code, fixed);
}
