//! Google Gemini adapter

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{ProviderAdapter, run_stream, with_config_headers};
use crate::http::{HttpClient, HttpRequest};
use crate::sse::SseOptions;
use crate::stream::{EventSink, StreamOutcome};
use crate::types::{
    ChatRequest, ConversationTurn, Provider, ProviderConfig, Role, ToolSpec, find_tool_call,
};

/// JSON-schema keywords the Gemini function declaration schema rejects
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties", "$defs", "default"];

pub struct GoogleAdapter {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl GoogleAdapter {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome {
        let body = serde_json::to_value(build_request(request)).unwrap_or(Value::Null);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url(),
            request.model
        );
        let http_request =
            HttpRequest::new(url, body).header("x-goog-api-key", self.config.api_key.clone());

        run_stream(
            self.http.as_ref(),
            with_config_headers(http_request, &self.config),
            Provider::Google,
            request.thinking.enabled,
            &SseOptions::default(),
            sink,
        )
        .await
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Value>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
    include_thoughts: bool,
}

fn build_request(request: &ChatRequest) -> GeminiRequest {
    let generation_config = GenerationConfig {
        temperature: request.temperature,
        max_output_tokens: request.max_tokens,
        thinking_config: request.thinking.enabled.then(|| ThinkingConfig {
            thinking_budget: request.thinking.budget_tokens,
            include_thoughts: true,
        }),
    };
    let has_config = generation_config.temperature.is_some()
        || generation_config.max_output_tokens.is_some()
        || generation_config.thinking_config.is_some();

    let tools = if request.tools.is_empty() {
        vec![]
    } else {
        let declarations: Vec<Value> = request.tools.iter().map(convert_tool).collect();
        vec![json!({ "functionDeclarations": declarations })]
    };

    GeminiRequest {
        contents: convert_turns(&request.turns),
        system_instruction: request
            .system_prompt
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| Content {
                role: None,
                parts: vec![json!({ "text": s })],
            }),
        tools,
        generation_config: has_config.then_some(generation_config),
    }
}

fn convert_tool(tool: &ToolSpec) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "parameters": clean_schema(tool.object_schema()),
    })
}

/// Strip schema keywords Gemini does not accept, recursively
fn clean_schema(schema: Value) -> Value {
    match schema {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(key, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key, clean_schema(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(clean_schema).collect()),
        other => other,
    }
}

fn convert_turns(turns: &[ConversationTurn]) -> Vec<Content> {
    let mut contents = vec![];

    for turn in turns {
        match turn.role {
            Role::User => {
                let mut parts = vec![];
                if !turn.text.is_empty() {
                    parts.push(json!({ "text": turn.text }));
                }
                for attachment in &turn.attachments {
                    parts.push(json!({
                        "inlineData": { "mimeType": attachment.mime_type, "data": attachment.data }
                    }));
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(Content {
                    role: Some("user"),
                    parts,
                });
            }
            Role::Assistant => contents.push(Content {
                role: Some("model"),
                parts: vec![json!({ "text": turn.text })],
            }),
            Role::ToolCall => {
                let Some(call) = &turn.tool_call else {
                    continue;
                };
                let mut parts = vec![];
                if !turn.text.is_empty() {
                    parts.push(json!({ "text": turn.text }));
                }
                let mut part = json!({
                    "functionCall": { "name": call.tool_id, "args": call.parameters }
                });
                if let Some(signature) = &call.continuity_token {
                    part["thoughtSignature"] = json!(signature);
                }
                parts.push(part);
                contents.push(Content {
                    role: Some("model"),
                    parts,
                });
            }
            Role::ToolResponse => {
                let Some(call_id) = &turn.tool_response_call_id else {
                    continue;
                };
                // functionResponse is matched by name, not id
                let Some(call) = find_tool_call(turns, call_id) else {
                    tracing::warn!("No tool_call turn found for Gemini tool response {}", call_id);
                    continue;
                };
                contents.push(Content {
                    role: Some("user"),
                    parts: vec![json!({
                        "functionResponse": {
                            "name": call.tool_id,
                            "response": { "content": turn.text },
                        }
                    })],
                });
            }
        }
    }

    contents
}
