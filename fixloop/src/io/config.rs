//! Repair session configuration (`fixloop.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fixloop.toml";

/// Repair configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values used
/// against a local OpenAI-compatible server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixloopConfig {
    /// Agent turns allowed per session.
    pub max_iterations: u32,

    /// Optional wall-clock budget for a whole session, in seconds.
    pub session_timeout_secs: Option<u64>,

    pub sandbox: SandboxConfig,

    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command; the script path is appended (e.g. `["python3"]`).
    pub interpreter: Vec<String>,

    /// Hard wall-clock limit per sandboxed run.
    pub timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Maximum characters of stderr kept on a submission record.
    pub stderr_cap_chars: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: vec!["python3".to_string()],
            timeout_secs: 10,
            output_limit_bytes: 100_000,
            stderr_cap_chars: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API (`/chat/completions` is appended).
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. Unset means no auth header.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Per-request deadline.
    pub request_timeout_secs: u64,
    /// Extra attempts after a retryable backend failure.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "Qwen/Qwen2.5-Coder-7B-Instruct".to_string(),
            api_key_env: "FIXLOOP_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            request_timeout_secs: 120,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for FixloopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            session_timeout_secs: None,
            sandbox: SandboxConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl FixloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.session_timeout_secs == Some(0) {
            return Err(anyhow!("session_timeout_secs must be > 0 when set"));
        }
        if self.sandbox.interpreter.is_empty() || self.sandbox.interpreter[0].trim().is_empty() {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.stderr_cap_chars == 0 {
            return Err(anyhow!("sandbox.stderr_cap_chars must be > 0"));
        }
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must not be empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must not be empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be within 0.0..=2.0"));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_secs.map(Duration::from_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixloopConfig> {
    if !path.exists() {
        let cfg = FixloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FixloopConfig::default());
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.sandbox.timeout_secs, 10);
        assert_eq!(cfg.sandbox.stderr_cap_chars, 2000);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixloop.toml");
        let cfg = FixloopConfig {
            max_iterations: 3,
            session_timeout_secs: Some(600),
            ..FixloopConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixloop.toml");
        fs::write(&path, "max_iterations = 8\n\n[model]\nmodel = \"local-coder\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 8);
        assert_eq!(cfg.model.model, "local-coder");
        assert_eq!(cfg.model.max_retries, 2);
        assert_eq!(cfg.sandbox, SandboxConfig::default());
    }

    #[test]
    fn rejects_zero_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("fixloop.toml");
        fs::write(&path, "max_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn rejects_empty_interpreter() {
        let cfg = FixloopConfig {
            sandbox: SandboxConfig {
                interpreter: Vec::new(),
                ..SandboxConfig::default()
            },
            ..FixloopConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
