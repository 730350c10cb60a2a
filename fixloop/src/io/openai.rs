//! OpenAI-compatible chat-completions backend (LM Studio, vLLM, OpenAI).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::tool_call::ToolSpec;
use crate::core::types::{Message, Role, ToolCall};
use crate::io::backend::{BackendError, ModelBackend, ModelRequest};
use crate::io::config::ModelConfig;

pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    max_tokens: u32,
    /// Source of ids for tool calls the server returned without one.
    next_call_id: AtomicU64,
}

impl OpenAiBackend {
    pub fn new(config: &ModelConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self {
            client: Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            next_call_id: AtomicU64::new(0),
        }
    }

    fn fallback_call_id(&self) -> String {
        format!(
            "call_fixloop_{}",
            self.next_call_id.fetch_add(1, Ordering::Relaxed)
        )
    }
}

impl ModelBackend for OpenAiBackend {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len(), timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest<'_>) -> Result<Message, BackendError> {
        let wire_messages = to_wire_messages(request.messages);
        let tools: Vec<WireTool<'_>> = request.tools.iter().map(WireTool::from_spec).collect();
        let body = WireRequest {
            model: &self.model,
            messages: &wire_messages,
            tools: &tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let start = Instant::now();
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().map_err(|err| {
            if err.is_timeout() {
                BackendError::Timeout(request.timeout)
            } else {
                BackendError::Transport(err.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        if status == 429 {
            warn!("backend rate limited");
            return Err(BackendError::RateLimited);
        }

        let text = resp
            .text()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        debug!(
            status,
            latency_ms = start.elapsed().as_millis() as u64,
            "backend responded"
        );
        if status >= 400 {
            return Err(BackendError::Api { status, body: text });
        }

        parse_reply(&text, || self.fallback_call_id())
    }
}

/// Convert history into the wire format.
///
/// Tool results whose id was never requested by an earlier assistant message
/// (autonomous test feedback) are sent as user messages, which the API accepts
/// anywhere in the conversation.
fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut requested: HashSet<&str> = HashSet::new();
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            Role::System => wire.push(WireMessage::text("system", &message.content)),
            Role::Assistant => {
                for call in &message.tool_calls {
                    requested.insert(call.id.as_str());
                }
                let tool_calls = message
                    .tool_calls
                    .iter()
                    .map(WireToolCall::from_call)
                    .collect::<Vec<_>>();
                wire.push(WireMessage {
                    role: "assistant",
                    content: Some(message.content.clone()),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                });
            }
            Role::Tool => match message.tool_call_id.as_deref() {
                Some(id) if requested.contains(id) => wire.push(WireMessage {
                    role: "tool",
                    content: Some(message.content.clone()),
                    tool_calls: None,
                    tool_call_id: Some(id.to_string()),
                }),
                _ => wire.push(WireMessage::text("user", &message.content)),
            },
        }
    }

    wire
}

fn parse_reply(
    body: &str,
    mut fallback_id: impl FnMut() -> String,
) -> Result<Message, BackendError> {
    let parsed: WireResponse = serde_json::from_str(body)
        .map_err(|err| BackendError::Malformed(format!("{err}: {body}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Malformed("no choices in response".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            // Unparseable arguments are kept verbatim; dispatch rejects them.
            let arguments = match call.function.arguments {
                Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                other => other,
            };
            ToolCall {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(&mut fallback_id),
                name: call.function.name,
                arguments,
            }
        })
        .collect();

    Ok(Message::assistant_with_calls(
        choice.message.content.unwrap_or_default(),
        tool_calls,
    ))
}

// ---------------------------------------------------------------------------
// Request/response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [WireTool<'a>],
    temperature: f64,
    max_tokens: u32,
}

fn no_tools(tools: &&[WireTool<'_>]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Serialize, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

impl WireToolCall {
    fn from_call(call: &ToolCall) -> Self {
        let arguments = match &call.arguments {
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        Self {
            id: call.id.clone(),
            kind: "function",
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

impl<'a> WireTool<'a> {
    fn from_spec(spec: &'a ToolSpec) -> Self {
        Self {
            kind: "function",
            function: spec,
        }
    }
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Deserialize)]
struct WireReplyMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireReplyToolCall>>,
}

#[derive(Deserialize)]
struct WireReplyToolCall {
    id: Option<String>,
    function: WireReplyFunction,
}

#[derive(Deserialize)]
struct WireReplyFunction {
    name: String,
    /// Usually a JSON-encoded string; some servers send an object or null.
    #[serde(default)]
    arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AUTO_TEST_CALL_ID;
    use serde_json::json;

    #[test]
    fn tool_results_follow_their_requests() {
        let history = vec![
            Message::system("task"),
            Message::assistant_with_calls(
                "checking",
                vec![ToolCall {
                    id: "call-1".to_string(),
                    name: "code_executor".to_string(),
                    arguments: json!({"code": "print(1)"}),
                }],
            ),
            Message::tool("call-1", "EXIT_CODE: 0"),
            Message::tool(AUTO_TEST_CALL_ID, "Test failed."),
        ];

        let wire = to_wire_messages(&history);
        let roles: Vec<&str> = wire.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec!["system", "assistant", "tool", "user"]);
        assert_eq!(wire[2].tool_call_id.as_deref(), Some("call-1"));
        let calls = wire[1].tool_calls.as_ref().expect("tool calls");
        assert_eq!(calls[0].function.arguments, r#"{"code":"print(1)"}"#);
    }

    #[test]
    fn parses_text_and_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "Let me run it.",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "code_executor", "arguments": "{\"code\":\"print(2)\"}"}
                    }]
                }
            }]
        })
        .to_string();

        let message = parse_reply(&body, || "unused".to_string()).expect("parse");
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "Let me run it.");
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].id, "call_abc");
        assert_eq!(message.tool_calls[0].arguments, json!({"code": "print(2)"}));
    }

    #[test]
    fn keeps_unparseable_arguments_and_fills_missing_ids() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "function": {"name": "error_analyzer", "arguments": "{broken"}
                    }]
                }
            }]
        })
        .to_string();

        let message = parse_reply(&body, || "generated-0".to_string()).expect("parse");
        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls[0].id, "generated-0");
        assert_eq!(message.tool_calls[0].arguments, json!("{broken"));
    }

    #[test]
    fn accepts_object_and_null_arguments() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [
                        {
                            "id": "call_obj",
                            "function": {"name": "code_executor", "arguments": {"code": "print(1)"}}
                        },
                        {
                            "id": "call_null",
                            "function": {"name": "error_analyzer", "arguments": null}
                        },
                        {
                            "id": "call_missing",
                            "function": {"name": "error_analyzer"}
                        }
                    ]
                }
            }]
        })
        .to_string();

        let message = parse_reply(&body, String::new).expect("parse");
        assert_eq!(message.tool_calls.len(), 3);
        assert_eq!(message.tool_calls[0].arguments, json!({"code": "print(1)"}));
        assert_eq!(message.tool_calls[1].arguments, Value::Null);
        assert_eq!(message.tool_calls[2].arguments, Value::Null);
    }

    #[test]
    fn empty_choices_is_malformed() {
        let err = parse_reply(r#"{"choices": []}"#, String::new).unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = parse_reply("<html>", String::new).unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let backend = OpenAiBackend::new(&ModelConfig {
            base_url: "http://localhost:1234/v1/".to_string(),
            ..ModelConfig::default()
        });
        assert_eq!(backend.endpoint, "http://localhost:1234/v1/chat/completions");
        assert_eq!(backend.fallback_call_id(), "call_fixloop_0");
        assert_eq!(backend.fallback_call_id(), "call_fixloop_1");
    }
}
