//! Autonomous debugging loop that repairs failing code with a tool-calling model.
//!
//! A session alternates between an agent turn (one model call) and tool
//! dispatch (requested tools plus automatic verification of any new candidate
//! fix) until a candidate passes the tests, the iteration budget is spent, or
//! the agent stops making progress. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (session state, delta merging,
//!   candidate extraction, tool-call parsing, the continuation decision).
//! - **[`io`]**: Side-effecting collaborators (sandboxed processes, model
//!   backend, config, artifacts). Behind traits so tests can script them.
//!
//! [`orchestrator`] drives the loop over [`agent`] and [`dispatch`].

pub mod agent;
pub mod cancel;
pub mod core;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
