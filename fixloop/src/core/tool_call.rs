//! Tool declarations and typed parsing of model tool calls.
//!
//! The model may request any tool name with any arguments. Requests are
//! validated against the declared JSON Schema and mapped onto a closed set of
//! capabilities; everything else becomes [`ToolRequest::Rejected`] so the
//! dispatcher can answer with an explanation instead of failing.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::types::ToolCall;

pub const ERROR_ANALYZER: &str = "error_analyzer";
pub const CODE_EXECUTOR: &str = "code_executor";

/// Tool declaration bound to the model backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// A validated capability request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    AnalyzeError { error_message: String, code: String },
    ExecuteCode { code: String, test_code: String },
    Rejected { name: String, reason: String },
}

fn analyzer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "error_message": {
                "type": "string",
                "description": "The error message from code execution"
            },
            "code": {
                "type": "string",
                "description": "The code that produced the error"
            }
        },
        "required": ["error_message", "code"]
    })
}

fn executor_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "Python code to execute"
            },
            "test_code": {
                "type": "string",
                "description": "Optional test code appended after the code"
            }
        },
        "required": ["code"]
    })
}

/// Declarations for every tool the agent may call.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: ERROR_ANALYZER.to_string(),
            description: "Analyzes an error message and provides insights about what might be \
                          wrong."
                .to_string(),
            parameters: analyzer_schema(),
        },
        ToolSpec {
            name: CODE_EXECUTOR.to_string(),
            description: "Executes Python code in a sandbox and returns stdout, stderr and the \
                          exit status. Use it to test whether a fix runs without errors."
                .to_string(),
            parameters: executor_schema(),
        },
    ]
}

static ANALYZER_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(&analyzer_schema()));
static EXECUTOR_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(&executor_schema()));

fn compile(schema: &Value) -> Validator {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .expect("built-in tool schema should compile")
}

/// Map a raw tool call onto a capability request.
pub fn parse_tool_call(call: &ToolCall) -> ToolRequest {
    let validator: &Validator = match call.name.as_str() {
        ERROR_ANALYZER => &ANALYZER_VALIDATOR,
        CODE_EXECUTOR => &EXECUTOR_VALIDATOR,
        other => {
            return rejected(
                call,
                format!("unknown tool '{other}' (available: {ERROR_ANALYZER}, {CODE_EXECUTOR})"),
            );
        }
    };

    let messages: Vec<String> = validator
        .iter_errors(&call.arguments)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return rejected(call, format!("invalid arguments: {}", messages.join("; ")));
    }

    let text = |key: &str| {
        call.arguments
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match call.name.as_str() {
        ERROR_ANALYZER => ToolRequest::AnalyzeError {
            error_message: text("error_message"),
            code: text("code"),
        },
        _ => ToolRequest::ExecuteCode {
            code: text("code"),
            test_code: text("test_code"),
        },
    }
}

fn rejected(call: &ToolCall, reason: String) -> ToolRequest {
    ToolRequest::Rejected {
        name: call.name.clone(),
        reason,
    }
}
