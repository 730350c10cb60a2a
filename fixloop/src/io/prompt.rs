//! Prompt rendering for agent turns.
//!
//! Two templates exist: the fixed system instruction prepended to every model
//! call, and the task message that seeds a session's history.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::extract::{FIX_END, FIX_START};
use crate::core::tool_call::{CODE_EXECUTOR, ERROR_ANALYZER};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    language: String,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self {
            env,
            language: "Python".to_string(),
        }
    }

    /// Fixed instruction: role, process steps, marker convention.
    pub fn render_system(&self) -> Result<String> {
        let template = self.env.get_template("system")?;
        let rendered = template.render(context! {
            language => &self.language,
            executor_tool => CODE_EXECUTOR,
            analyzer_tool => ERROR_ANALYZER,
            fix_start => FIX_START,
            fix_end => FIX_END,
        })?;
        Ok(rendered)
    }

    /// Task description holding the buggy code and the tests.
    pub fn render_task(&self, original_code: &str, test_code: &str) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            fence => self.language.to_lowercase(),
            original_code => original_code.trim_end(),
            test_code => test_code.trim_end(),
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
