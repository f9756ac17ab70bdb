//! Cohere v2 chat adapter

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, function_tool_call, run_stream, with_config_headers};
use crate::http::{HttpClient, HttpRequest};
use crate::sse::SseOptions;
use crate::stream::{EventSink, StreamOutcome};
use crate::types::{ChatRequest, ConversationTurn, Provider, ProviderConfig, Role};

pub struct CohereAdapter {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl CohereAdapter {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    fn provider(&self) -> Provider {
        Provider::Cohere
    }

    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome {
        let body = serde_json::to_value(build_request(request)).unwrap_or(Value::Null);
        let url = format!("{}/v2/chat", self.config.base_url());
        let http_request = HttpRequest::new(url, body)
            .header("Authorization", format!("Bearer {}", self.config.api_key));

        run_stream(
            self.http.as_ref(),
            with_config_headers(http_request, &self.config),
            Provider::Cohere,
            request.thinking.enabled,
            &SseOptions::default(),
            sink,
        )
        .await
    }
}

#[derive(Debug, Serialize)]
struct CohereRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Value>,
}

fn build_request(request: &ChatRequest) -> CohereRequest {
    let mut messages = vec![];
    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.extend(request.turns.iter().filter_map(convert_turn));

    CohereRequest {
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
        thinking: request.thinking.enabled.then(|| {
            json!({ "type": "enabled", "token_budget": request.thinking.budget_tokens })
        }),
    }
}

fn convert_turn(turn: &ConversationTurn) -> Option<Value> {
    let message = match turn.role {
        Role::User if turn.attachments.is_empty() => {
            json!({ "role": "user", "content": turn.text })
        }
        Role::User => {
            let mut parts = vec![json!({ "type": "text", "text": turn.text })];
            // Cohere accepts images only
            for attachment in turn.attachments.iter().filter(|a| a.is_image()) {
                parts.push(json!({
                    "type": "image_url",
                    "image_url": { "url": attachment.data_url() }
                }));
            }
            json!({ "role": "user", "content": parts })
        }
        Role::Assistant => json!({ "role": "assistant", "content": turn.text }),
        Role::ToolCall => {
            let call = turn.tool_call.as_ref()?;
            let mut message = json!({
                "role": "assistant",
                "tool_calls": [function_tool_call(call)],
            });
            if !turn.text.is_empty() {
                message["tool_plan"] = json!(turn.text);
            }
            message
        }
        Role::ToolResponse => {
            let call_id = turn.tool_response_call_id.as_deref()?;
            json!({ "role": "tool", "tool_call_id": call_id, "content": turn.text })
        }
    };
    Some(message)
}
