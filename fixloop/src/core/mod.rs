//! Deterministic, pure logic of the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! session state and return deterministic outputs suitable for tests.

pub mod budget;
pub mod decision;
pub mod extract;
pub mod session;
pub mod state_update;
pub mod tool_call;
pub mod types;
