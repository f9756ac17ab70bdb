//! Anthropic Messages API adapter

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, run_stream, tool_result_for, with_config_headers};
use crate::http::{HttpClient, HttpRequest};
use crate::sse::SseOptions;
use crate::stream::{EventSink, StreamOutcome};
use crate::types::{ChatRequest, ConversationTurn, Provider, ProviderConfig, Role, ToolSpec};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const MIN_THINKING_BUDGET: u32 = 1024;

pub struct AnthropicAdapter {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl AnthropicAdapter {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome {
        let body = serde_json::to_value(build_request(request)).unwrap_or(Value::Null);
        let url = format!("{}/v1/messages", self.config.base_url());
        let http_request = HttpRequest::new(url, body)
            .header("x-api-key", self.config.api_key.clone())
            .header("anthropic-version", API_VERSION);

        run_stream(
            self.http.as_ref(),
            with_config_headers(http_request, &self.config),
            Provider::Anthropic,
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
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Value,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

fn build_request(request: &ChatRequest) -> AnthropicRequest {
    let mut max_tokens = request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let thinking = request.thinking.enabled.then(|| {
        let budget_tokens = request.thinking.budget_tokens.max(MIN_THINKING_BUDGET);
        // The budget counts against max_tokens, which must exceed it
        if max_tokens <= budget_tokens {
            max_tokens = budget_tokens.saturating_add(DEFAULT_MAX_TOKENS / 2);
        }
        ThinkingConfig {
            thinking_type: "enabled",
            budget_tokens,
        }
    });

    AnthropicRequest {
        model: request.model.clone(),
        messages: convert_turns(&request.turns),
        max_tokens,
        stream: true,
        system: request.system_prompt.clone().filter(|s| !s.is_empty()),
        temperature: if thinking.is_some() { None } else { request.temperature },
        tools: request.tools.iter().map(convert_tool).collect(),
        thinking,
    }
}

fn convert_tool(tool: &ToolSpec) -> AnthropicTool {
    AnthropicTool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.object_schema(),
    }
}

fn user_blocks(turn: &ConversationTurn) -> Vec<Value> {
    let mut blocks = vec![];
    for attachment in &turn.attachments {
        let block_type = if attachment.is_image() { "image" } else { "document" };
        blocks.push(json!({
            "type": block_type,
            "source": {
                "type": "base64",
                "media_type": attachment.mime_type,
                "data": attachment.data,
            }
        }));
    }
    if !turn.text.is_empty() || blocks.is_empty() {
        blocks.push(json!({ "type": "text", "text": turn.text }));
    }
    blocks
}

fn convert_turns(turns: &[ConversationTurn]) -> Vec<AnthropicMessage> {
    let mut result = vec![];

    for turn in turns {
        match turn.role {
            Role::User => result.push(AnthropicMessage {
                role: "user",
                content: Value::Array(user_blocks(turn)),
            }),
            Role::Assistant => result.push(AnthropicMessage {
                role: "assistant",
                content: json!([{ "type": "text", "text": turn.text }]),
            }),
            Role::ToolCall => {
                let Some(call) = &turn.tool_call else {
                    continue;
                };
                let mut blocks = vec![];
                // A signed thinking block must precede tool_use when thinking is on
                if let Some(signature) = &call.continuity_token {
                    blocks.push(json!({
                        "type": "thinking",
                        "thinking": turn.thoughts.clone().unwrap_or_default(),
                        "signature": signature,
                    }));
                }
                if !turn.text.is_empty() {
                    blocks.push(json!({ "type": "text", "text": turn.text }));
                }
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.tool_id,
                    "input": call.parameters,
                }));
                result.push(AnthropicMessage {
                    role: "assistant",
                    content: Value::Array(blocks),
                });
            }
            Role::ToolResponse => {
                let Some(call_id) = &turn.tool_response_call_id else {
                    continue;
                };
                let is_error = tool_result_for(turns, call_id).is_some_and(|r| r.is_error());
                result.push(AnthropicMessage {
                    role: "user",
                    content: json!([{
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": turn.text,
                        "is_error": is_error,
                    }]),
                });
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeHttp;
    use crate::providers::test_support::tool_round_request;
    use crate::stream::NullSink;

    #[test]
    fn test_body_with_thinking() {
        let request = tool_round_request(Provider::Anthropic);
        let body = serde_json::to_value(build_request(&request)).unwrap();

        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["thinking"], json!({"type": "enabled", "budget_tokens": 4096}));
        assert_eq!(body["max_tokens"], 8192);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"][0]["type"], "image");
        assert_eq!(messages[0]["content"][0]["source"]["media_type"], "image/png");
        assert_eq!(messages[0]["content"][1]["text"], "What time is it?");

        let assistant = messages[1]["content"].as_array().unwrap();
        assert_eq!(
            assistant[0],
            json!({"type": "thinking", "thinking": "Need a clock", "signature": "sig-1"})
        );
        assert_eq!(assistant[1]["text"], "Let me check.");
        assert_eq!(assistant[2]["type"], "tool_use");
        assert_eq!(assistant[2]["input"], json!({"tz": "UTC"}));

        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");
        assert_eq!(messages[2]["content"][0]["is_error"], false);
    }

    #[test]
    fn test_max_tokens_raised_above_budget() {
        let request = ChatRequest::new("claude", vec![ConversationTurn::user("hi")])
            .with_thinking(crate::types::ThinkingConfig::enabled(16000));
        let body = build_request(&request);
        assert!(body.max_tokens > 16000);

        let request =
            ChatRequest::new("claude", vec![ConversationTurn::user("hi")]).with_temperature(0.2);
        let body = build_request(&request);
        assert!(body.thinking.is_none());
        assert_eq!(body.temperature, Some(0.2));
    }

    #[test]
    fn test_huge_budget_saturates_max_tokens() {
        let request = ChatRequest::new("claude", vec![ConversationTurn::user("hi")])
            .with_thinking(crate::types::ThinkingConfig::enabled(u32::MAX - 10));
        let body = build_request(&request);
        assert_eq!(body.max_tokens, u32::MAX);
    }

    #[tokio::test]
    async fn test_headers_and_url() {
        let http = FakeHttp::default().reply(
            200,
            concat!(
                "event: content_block_delta\n",
                "data: {\"type\":\"content_block_delta\",\"index\":0,",
                "\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ),
        );
        let adapter = AnthropicAdapter::new(
            ProviderConfig::new(Provider::Anthropic, "sk-ant"),
            Arc::new(http.clone()),
        );
        let outcome = adapter
            .stream(&ChatRequest::new("claude", vec![ConversationTurn::user("hi")]), &NullSink)
            .await;

        assert_eq!(outcome.text(), "ok");
        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert!(request.headers.contains(&("x-api-key".to_string(), "sk-ant".to_string())));
        assert!(request
            .headers
            .contains(&("anthropic-version".to_string(), API_VERSION.to_string())));
    }
}
