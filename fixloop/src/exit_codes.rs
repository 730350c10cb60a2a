//! Stable exit codes for fixloop CLI commands.

/// Session fixed the code, or the command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config, or other errors.
pub const INVALID: i32 = 1;
/// Session ended without a passing fix, or `exec` ran code that failed.
pub const UNFIXED: i32 = 2;
/// The model backend stayed unreachable.
pub const BACKEND: i32 = 3;
