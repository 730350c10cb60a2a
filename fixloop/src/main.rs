//! Autonomous debugging loop CLI.
//!
//! `fixloop run` hands buggy code and its tests to a tool-calling model and
//! iterates until a candidate fix passes or the iteration budget is spent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use fixloop::cancel::CancelToken;
use fixloop::core::session::SessionState;
use fixloop::core::types::SubmissionRecord;
use fixloop::exit_codes;
use fixloop::io::analyzer::{ErrorAnalyzer, PatternAnalyzer};
use fixloop::io::config::{DEFAULT_CONFIG_FILE, FixloopConfig, load_config, write_config};
use fixloop::io::openai::OpenAiBackend;
use fixloop::io::sandbox::{ExecRequest, PythonSandbox, Sandbox};
use fixloop::io::transcript::{SessionSummary, write_transcript};
use fixloop::logging;
use fixloop::orchestrator::{
    Orchestrator, SessionError, SessionEvent, SessionOptions, SessionRequest,
};

#[derive(Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Autonomous debugging loop for failing Python code"
)]
struct Cli {
    /// Config file (defaults apply when it does not exist).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file holding the defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Repair `--code` until `--tests` pass.
    Run {
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        tests: PathBuf,
        /// Override `max_iterations` from the config.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Directory receiving `session.json` and `history.jsonl`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run code (and optional tests) once in the sandbox.
    Exec {
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        tests: Option<PathBuf>,
    },
    /// Print hints for an error message.
    Analyze {
        #[arg(long)]
        error: String,
        #[arg(long)]
        code: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            code,
            tests,
            max_iterations,
            out,
        } => cmd_run(&cli.config, &code, &tests, max_iterations, out.as_deref()),
        Command::Exec { code, tests } => cmd_exec(&cli.config, &code, tests.as_deref()),
        Command::Analyze { error, code } => cmd_analyze(&error, code.as_deref()),
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &FixloopConfig::default())?;
    println!("{}", config_path.display());
    Ok(exit_codes::OK)
}

/// Final session summary printed to stdout.
#[derive(Serialize)]
struct RunReport<'a> {
    stop: &'a str,
    is_fixed: bool,
    first_pass: Option<bool>,
    iterations: u32,
    max_iterations: u32,
    fixed_code: &'a str,
    submissions: &'a [SubmissionRecord],
    duration_ms: u64,
}

impl<'a> RunReport<'a> {
    fn new(stop: &'a str, state: &'a SessionState, duration_ms: u64) -> Self {
        Self {
            stop,
            is_fixed: state.is_fixed,
            first_pass: state.first_pass,
            iterations: state.iterations,
            max_iterations: state.max_iterations,
            fixed_code: &state.fixed_code,
            submissions: &state.submissions,
            duration_ms,
        }
    }
}

fn cmd_run(
    config_path: &Path,
    code_path: &Path,
    tests_path: &Path,
    max_iterations: Option<u32>,
    out: Option<&Path>,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let request = SessionRequest::new(read_source(code_path)?, read_source(tests_path)?)
        .with_max_iterations(max_iterations.unwrap_or(config.max_iterations));

    let backend = OpenAiBackend::new(&config.model);
    let sandbox = PythonSandbox::new(&config.sandbox);
    let orchestrator = Orchestrator::new(
        &backend,
        &sandbox,
        &PatternAnalyzer,
        SessionOptions::from_config(&config),
    );

    let started = Instant::now();
    let result = orchestrator.run(&request, &CancelToken::new(), |event| match event {
        SessionEvent::AgentTurn {
            iteration,
            tool_calls,
            new_candidate,
        } => eprintln!(
            "turn {iteration}/{}: {tool_calls} tool call(s){}",
            request.max_iterations,
            if *new_candidate { ", new candidate" } else { "" }
        ),
        SessionEvent::ToolsAnswered {
            submission: Some((index, passed)),
            ..
        } => eprintln!(
            "submission {index}: {}",
            if *passed { "passed" } else { "failed" }
        ),
        SessionEvent::ToolsAnswered { .. } => {}
    });

    match result {
        Ok(outcome) => {
            let duration_ms = outcome.elapsed.as_millis() as u64;
            let stop = outcome.stop.as_str();
            emit(stop, &outcome.state, duration_ms, out)?;
            Ok(if outcome.state.is_fixed {
                exit_codes::OK
            } else {
                exit_codes::UNFIXED
            })
        }
        Err(SessionError::BackendUnavailable {
            attempts,
            source,
            state,
        }) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            emit("backend_unavailable", &state, duration_ms, out)?;
            eprintln!("model backend unavailable after {attempts} attempts: {source}");
            Ok(exit_codes::BACKEND)
        }
        Err(err) => Err(err.into()),
    }
}

fn emit(stop: &str, state: &SessionState, duration_ms: u64, out: Option<&Path>) -> Result<()> {
    let report = RunReport::new(stop, state, duration_ms);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serialize run report")?
    );
    if let Some(dir) = out {
        let paths = write_transcript(
            dir,
            &SessionSummary {
                stop,
                duration_ms,
                state,
            },
        )?;
        eprintln!("transcript written to {}", paths.dir.display());
    }
    Ok(())
}

fn cmd_exec(config_path: &Path, code_path: &Path, tests_path: Option<&Path>) -> Result<i32> {
    let config = load_config(config_path)?;
    let tests = tests_path.map(read_source).transpose()?.unwrap_or_default();
    let sandbox = PythonSandbox::new(&config.sandbox);

    let outcome = sandbox.run(
        &ExecRequest::new(read_source(code_path)?, tests),
        &CancelToken::new(),
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("serialize exec outcome")?
    );
    Ok(if outcome.passed() {
        exit_codes::OK
    } else {
        exit_codes::UNFIXED
    })
}

fn cmd_analyze(error: &str, code_path: Option<&Path>) -> Result<i32> {
    let code = code_path.map(read_source).transpose()?.unwrap_or_default();
    println!("{}", PatternAnalyzer.analyze(error, &code));
    Ok(exit_codes::OK)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
