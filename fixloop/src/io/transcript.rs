//! Session artifacts written by the CLI after a session ends.
//!
//! The loop itself never persists anything; callers decide whether a finished
//! session is worth keeping.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::session::SessionState;

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub dir: PathBuf,
    pub session_path: PathBuf,
    pub history_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            session_path: dir.join("session.json"),
            history_path: dir.join("history.jsonl"),
        }
    }
}

/// Final session summary persisted next to the history.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary<'a> {
    pub stop: &'a str,
    pub duration_ms: u64,
    pub state: &'a SessionState,
}

pub fn write_transcript(dir: &Path, summary: &SessionSummary<'_>) -> Result<TranscriptPaths> {
    let paths = TranscriptPaths::new(dir);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create transcript dir {}", paths.dir.display()))?;

    let mut session = serde_json::to_string_pretty(summary).context("serialize session")?;
    session.push('\n');
    fs::write(&paths.session_path, session)
        .with_context(|| format!("write {}", paths.session_path.display()))?;

    let mut history = Vec::new();
    for message in &summary.state.history {
        serde_json::to_writer(&mut history, message).context("serialize message")?;
        history.write_all(b"\n").context("buffer history")?;
    }
    fs::write(&paths.history_path, history)
        .with_context(|| format!("write {}", paths.history_path.display()))?;

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Message;
    use crate::test_support::session;

    #[test]
    fn writes_session_and_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut state = session(3);
        state.history.push(Message::assistant("done"));

        let paths = write_transcript(
            &temp.path().join("out"),
            &SessionSummary {
                stop: "dead_end",
                duration_ms: 5,
                state: &state,
            },
        )
        .expect("write");

        let session_json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.session_path).expect("read"))
                .expect("parse");
        assert_eq!(session_json["stop"], "dead_end");
        assert_eq!(session_json["state"]["max_iterations"], 3);

        let history = fs::read_to_string(&paths.history_path).expect("read");
        assert_eq!(history.lines().count(), 2);
        assert!(history.lines().last().expect("line").contains("\"assistant\""));
    }
}
