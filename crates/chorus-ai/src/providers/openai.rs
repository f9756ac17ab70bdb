//! OpenAI Responses API adapter
//!
//! The only adapter with a fallback: a streaming request rejected with HTTP
//! 400 (organisation not verified for streaming, some reasoning models) is
//! retried once with `stream: false` and the same body.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use super::{ProviderAdapter, error_outcome, read_stream, transport_error, with_config_headers};
use crate::http::{HttpClient, HttpRequest};
use crate::normalize::Normalizer;
use crate::sse::SseOptions;
use crate::stream::{EventSink, StreamOutcome};
use crate::types::{ChatRequest, ConversationTurn, Provider, ProviderConfig, Role, ToolSpec};

pub struct OpenAIAdapter {
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
}

impl OpenAIAdapter {
    pub fn new(config: ProviderConfig, http: Arc<dyn HttpClient>) -> Self {
        Self { config, http }
    }

    fn http_request(&self, body: &ResponsesRequest) -> HttpRequest {
        let url = format!("{}/responses", self.config.base_url());
        let body = serde_json::to_value(body).unwrap_or(Value::Null);
        let request = HttpRequest::new(url, body)
            .header("Authorization", format!("Bearer {}", self.config.api_key));
        with_config_headers(request, &self.config)
    }

    /// Retry a rejected streaming call without streaming. `None` when the
    /// retry did not produce a usable outcome.
    async fn fallback(
        &self,
        body: &mut ResponsesRequest,
        thinking_requested: bool,
        sink: &dyn EventSink,
    ) -> Option<StreamOutcome> {
        body.stream = false;
        let response = match self.http.post(self.http_request(body)).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::debug!("OpenAI non-streaming fallback rejected ({})", response.status);
                return None;
            }
            Err(e) => {
                tracing::debug!("OpenAI non-streaming fallback failed: {}", e);
                return None;
            }
        };

        let text = response.text().await.ok()?;
        let json: Value = match serde_json::from_str(&text) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("OpenAI fallback body was not JSON: {}", e);
                return None;
            }
        };

        let mut normalizer = Normalizer::new(Provider::OpenAI, thinking_requested, sink);
        normalizer.ingest_response(&json);
        match normalizer.finish() {
            StreamOutcome::Error { message } => {
                tracing::debug!("OpenAI fallback produced no answer: {}", message);
                None
            }
            outcome => Some(outcome),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAIAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome {
        let mut body = build_request(request);
        let thinking_requested = request.thinking.enabled;

        let response = match self.http.post(self.http_request(&body)).await {
            Ok(response) => response,
            Err(e) => return transport_error(Provider::OpenAI, &e),
        };

        if response.status == 400 {
            let original = error_outcome(Provider::OpenAI, response).await;
            tracing::info!("OpenAI rejected the streaming request; retrying without streaming");
            return match self.fallback(&mut body, thinking_requested, sink).await {
                Some(outcome) => outcome,
                None => original,
            };
        }
        if !response.is_success() {
            return error_outcome(Provider::OpenAI, response).await;
        }

        read_stream(
            response,
            Provider::OpenAI,
            thinking_requested,
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
struct ResponsesRequest {
    model: String,
    input: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<Reasoning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct FunctionTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct Reasoning {
    effort: &'static str,
    summary: &'static str,
}

fn build_request(request: &ChatRequest) -> ResponsesRequest {
    let thinking = request.thinking.enabled;
    ResponsesRequest {
        model: request.model.clone(),
        input: convert_turns(&request.turns),
        stream: true,
        instructions: request.system_prompt.clone().filter(|s| !s.is_empty()),
        tools: request.tools.iter().map(convert_tool).collect(),
        reasoning: thinking.then(|| Reasoning {
            effort: request.thinking.effort(),
            summary: "auto",
        }),
        // Reasoning models reject sampling parameters
        temperature: if thinking { None } else { request.temperature },
        max_output_tokens: request.max_tokens,
    }
}

fn convert_tool(tool: &ToolSpec) -> FunctionTool {
    FunctionTool {
        tool_type: "function",
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.object_schema(),
    }
}

fn user_content(turn: &ConversationTurn) -> Value {
    if turn.attachments.is_empty() {
        return json!(turn.text);
    }
    let mut parts = vec![json!({ "type": "input_text", "text": turn.text })];
    for attachment in &turn.attachments {
        if attachment.is_image() {
            parts.push(json!({ "type": "input_image", "image_url": attachment.data_url() }));
        } else {
            parts.push(json!({
                "type": "input_file",
                "filename": attachment.file_name.as_deref().unwrap_or("attachment"),
                "file_data": attachment.data_url(),
            }));
        }
    }
    Value::Array(parts)
}

fn convert_turns(turns: &[ConversationTurn]) -> Vec<Value> {
    let mut input = vec![];
    for turn in turns {
        match turn.role {
            Role::User => input.push(json!({ "role": "user", "content": user_content(turn) })),
            Role::Assistant => input.push(json!({ "role": "assistant", "content": turn.text })),
            Role::ToolCall => {
                if !turn.text.is_empty() {
                    input.push(json!({ "role": "assistant", "content": turn.text }));
                }
                if let Some(call) = &turn.tool_call {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.tool_id,
                        "arguments": call.arguments_json(),
                    }));
                }
            }
            Role::ToolResponse => {
                if let Some(call_id) = &turn.tool_response_call_id {
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": turn.text,
                    }));
                }
            }
        }
    }
    input
}
