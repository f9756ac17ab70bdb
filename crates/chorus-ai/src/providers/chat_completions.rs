//! Chat-completions adapter for Poe and OpenAI-compatible endpoints

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, function_tool_call, run_stream, with_config_headers};
use crate::http::{HttpClient, HttpRequest};
use crate::sse::SseOptions;
use crate::stream::{EventSink, StreamOutcome};
use crate::types::{ChatRequest, ConversationTurn, Provider, ProviderConfig, Role};

pub struct ChatCompletionsAdapter {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl ChatCompletionsAdapter {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl ProviderAdapter for ChatCompletionsAdapter {
    fn provider(&self) -> Provider {
        self.config.provider
    }

    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome {
        let provider = self.config.provider;
        let body = serde_json::to_value(build_request(provider, request)).unwrap_or(Value::Null);
        let url = format!("{}/chat/completions", self.config.base_url());
        let http_request = with_config_headers(
            HttpRequest::new(url, body)
                .header("Authorization", format!("Bearer {}", self.config.api_key)),
            &self.config,
        );

        // Poe and aggregators such as OpenRouter interleave `:` keepalives
        run_stream(
            self.http.as_ref(),
            http_request,
            provider,
            request.thinking.enabled,
            &SseOptions::skipping_keepalives(),
            sink,
        )
        .await
    }
}

#[derive(Debug, Serialize)]
struct CompletionsRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    /// Poe
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    /// OpenRouter-style aggregators
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Value>,
}

fn build_request(provider: Provider, request: &ChatRequest) -> CompletionsRequest {
    let thinking = request.thinking;
    let (reasoning_effort, reasoning) = match (thinking.enabled, provider) {
        (false, _) => (None, None),
        (true, Provider::Poe) => (Some(thinking.effort()), None),
        (true, _) => (None, Some(json!({ "max_tokens": thinking.budget_tokens }))),
    };

    let mut messages = vec![];
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(request.turns.iter().filter_map(convert_turn));

    CompletionsRequest {
        model: request.model.clone(),
        messages,
        stream: true,
        tools: request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.object_schema(),
                    }
                })
            })
            .collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        reasoning_effort,
        reasoning,
    }
}

fn convert_turn(turn: &ConversationTurn) -> Option<Value> {
    let message = match turn.role {
        Role::User if turn.attachments.is_empty() => {
            json!({ "role": "user", "content": turn.text })
        }
        Role::User => {
            let mut parts = vec![json!({ "type": "text", "text": turn.text })];
            for attachment in &turn.attachments {
                if attachment.is_image() {
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": { "url": attachment.data_url() }
                    }));
                } else {
                    parts.push(json!({
                        "type": "file",
                        "file": {
                            "filename": attachment.file_name.as_deref().unwrap_or("attachment"),
                            "file_data": attachment.data_url(),
                        }
                    }));
                }
            }
            json!({ "role": "user", "content": parts })
        }
        Role::Assistant => json!({ "role": "assistant", "content": turn.text }),
        Role::ToolCall => {
            let call = turn.tool_call.as_ref()?;
            let content = if turn.text.is_empty() {
                Value::Null
            } else {
                json!(turn.text)
            };
            json!({
                "role": "assistant",
                "content": content,
                "tool_calls": [function_tool_call(call)],
            })
        }
        Role::ToolResponse => {
            let call_id = turn.tool_response_call_id.as_deref()?;
            json!({ "role": "tool", "tool_call_id": call_id, "content": turn.text })
        }
    };
    Some(message)
}
