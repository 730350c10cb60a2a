//! Sandboxed execution of candidate code against a test script.
//!
//! The [`Sandbox`] trait decouples tool dispatch from process spawning. Tests
//! use scripted sandboxes that return predetermined outcomes.

use std::fs;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::{ExecOutcome, ExecReport};
use crate::io::config::SandboxConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const SCRIPT_NAME: &str = "solution.py";

/// Code and tests for one sandboxed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub code: String,
    /// Appended after `code`; may be empty.
    pub tests: String,
}

impl ExecRequest {
    pub fn new(code: impl Into<String>, tests: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            tests: tests.into(),
        }
    }

    /// Full script body: code, blank line, tests.
    pub fn script(&self) -> String {
        if self.tests.is_empty() {
            self.code.clone()
        } else {
            format!("{}\n\n{}", self.code, self.tests)
        }
    }
}

/// Isolated code execution with a hard wall-clock timeout.
///
/// Implementations never return an error: launch failures and timeouts are
/// reported as [`ExecOutcome`] variants so the agent can react to them.
pub trait Sandbox: Sync {
    fn run(&self, request: &ExecRequest, cancel: &CancelToken) -> ExecOutcome;
}

/// Sandbox that runs the script with a Python interpreter in a fresh temp dir.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    interpreter: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl PythonSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn run_in_tempdir(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<CommandOutput> {
        let workdir = tempfile::Builder::new()
            .prefix("fixloop-")
            .tempdir()
            .context("create sandbox dir")?;
        let script_path = workdir.path().join(SCRIPT_NAME);
        fs::write(&script_path, request.script())
            .with_context(|| format!("write {}", script_path.display()))?;

        let (program, args) = self
            .interpreter
            .split_first()
            .context("sandbox interpreter is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(SCRIPT_NAME)
            .current_dir(workdir.path())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1");

        // `workdir` is removed when dropped, after the child has been reaped.
        run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes, cancel)
    }
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), code_bytes = request.code.len()))]
    fn run(&self, request: &ExecRequest, cancel: &CancelToken) -> ExecOutcome {
        info!("running sandboxed script");
        let output = match self.run_in_tempdir(request, cancel) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox launch failed");
                return ExecOutcome::LaunchFailed {
                    error: format!("{err:#}"),
                };
            }
        };

        let duration_ms = output.elapsed.as_secs_f64() * 1000.0;
        if output.cancelled() {
            return ExecOutcome::Cancelled;
        }
        if output.timed_out() {
            warn!(timeout_secs = self.timeout.as_secs(), "sandboxed script timed out");
            return ExecOutcome::TimedOut {
                timeout_secs: self.timeout.as_secs(),
                stdout: output.stdout_text(),
                stderr: output.stderr_text(),
                duration_ms,
            };
        }

        // A missing code means the child died from a signal.
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(exit_code, duration_ms, "sandboxed script finished");
        ExecOutcome::Completed(ExecReport {
            passed: exit_code == 0,
            exit_code,
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            duration_ms,
        })
    }
}
