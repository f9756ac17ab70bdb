//! Provider adapters
//!
//! One adapter per provider family. Each builds its provider's request body,
//! issues a single streaming POST through the [`HttpClient`] seam and feeds
//! the body through a [`Normalizer`]. Adapters never return `Err`: every
//! failure is folded into [`StreamOutcome::Error`].

pub mod anthropic;
pub mod chat_completions;
pub mod cohere;
pub mod google;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
use crate::normalize::{Normalizer, error_message};
use crate::sse::{SseEnd, SseOptions, read_sse};
use crate::stream::{EventSink, StreamOutcome};
use crate::types::{ChatRequest, ConversationTurn, Provider, ProviderConfig, ToolExecutionResult};

pub use anthropic::AnthropicAdapter;
pub use chat_completions::ChatCompletionsAdapter;
pub use cohere::CohereAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAIAdapter;

/// One provider call: request in, outcome out
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Stream one completion, forwarding deltas to `sink`
    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome;
}

/// Build the adapter for a provider config
pub fn create_adapter(
    config: ProviderConfig,
    http: Arc<dyn HttpClient>,
) -> Result<Arc<dyn ProviderAdapter>> {
    if config.api_key.trim().is_empty() {
        return Err(Error::InvalidApiKey(config.provider.name().to_string()));
    }

    let adapter: Arc<dyn ProviderAdapter> = match config.provider {
        Provider::OpenAI => Arc::new(OpenAIAdapter::new(config, http)),
        Provider::Anthropic => Arc::new(AnthropicAdapter::new(config, http)),
        Provider::Google => Arc::new(GoogleAdapter::new(config, http)),
        Provider::Cohere => Arc::new(CohereAdapter::new(config, http)),
        Provider::Poe | Provider::OpenAICompatible => {
            Arc::new(ChatCompletionsAdapter::new(config, http))
        }
    };
    Ok(adapter)
}

/// Source of adapters for the orchestrator; tests supply scripted ones
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>>;
}

/// Factory sharing one HTTP client across all adapters
#[derive(Clone)]
pub struct HttpAdapterFactory {
    http: Arc<dyn HttpClient>,
}

impl HttpAdapterFactory {
    /// Factory over a reqwest client
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(Arc::new(ReqwestClient::new()?)))
    }

    pub fn with_client(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
        create_adapter(config.clone(), self.http.clone())
    }
}

// ============================================================================
// Shared request plumbing
// ============================================================================

/// Attach the config's extra headers
pub(crate) fn with_config_headers(
    mut request: HttpRequest,
    config: &ProviderConfig,
) -> HttpRequest {
    for (name, value) in &config.headers {
        request = request.header(name.clone(), value.clone());
    }
    request
}

/// POST and read the stream, folding every failure into the outcome
pub(crate) async fn run_stream(
    http: &dyn HttpClient,
    request: HttpRequest,
    provider: Provider,
    thinking_requested: bool,
    options: &SseOptions,
    sink: &dyn EventSink,
) -> StreamOutcome {
    let response = match http.post(request).await {
        Ok(response) => response,
        Err(e) => return transport_error(provider, &e),
    };
    if !response.is_success() {
        return error_outcome(provider, response).await;
    }
    read_stream(response, provider, thinking_requested, options, sink).await
}

/// Normalize a 2xx streaming body
pub(crate) async fn read_stream(
    response: HttpResponse,
    provider: Provider,
    thinking_requested: bool,
    options: &SseOptions,
    sink: &dyn EventSink,
) -> StreamOutcome {
    let mut normalizer = Normalizer::new(provider, thinking_requested, sink);
    if let SseEnd::Failed(message) = read_sse(response.body, options, &mut normalizer).await {
        normalizer.fail(format!("Stream interrupted: {}", message));
    }
    normalizer.finish()
}

/// Outcome for a non-2xx response
pub(crate) async fn error_outcome(provider: Provider, response: HttpResponse) -> StreamOutcome {
    let status = response.status;
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(status, &body);
    tracing::warn!("{} request failed ({}): {}", provider.name(), status, message);
    StreamOutcome::error(format!("{} API error ({}): {}", provider.name(), status, message))
}

pub(crate) fn transport_error(provider: Provider, error: &Error) -> StreamOutcome {
    tracing::warn!("{} request could not be sent: {}", provider.name(), error);
    StreamOutcome::error(format!("{} request failed: {}", provider.name(), error.user_message()))
}

/// Structured error message from an error body, else the raw body, else the
/// status line.
pub fn extract_error_message(status: u16, body: &str) -> String {
    let body = body.trim();
    let structured = serde_json::from_str::<Value>(body).ok().and_then(|json| match json {
        // Gemini wraps its error object in an array
        Value::Array(items) => items.first().and_then(error_message),
        other => error_message(&other),
    });

    match structured {
        Some(message) => message,
        None if !body.is_empty() => body.to_string(),
        None => format!("HTTP {}", status),
    }
}

/// Result recorded on the tool_call turn answered by `call_id`
pub(crate) fn tool_result_for<'a>(
    turns: &'a [ConversationTurn],
    call_id: &str,
) -> Option<&'a ToolExecutionResult> {
    turns
        .iter()
        .filter(|t| t.tool_call_id.as_deref() == Some(call_id))
        .find_map(|t| t.tool_result.as_ref())
}

/// OpenAI-shaped `tool_calls` entry, shared by chat completions and Cohere
pub(crate) fn function_tool_call(call: &crate::types::ToolCall) -> Value {
    serde_json::json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.tool_id,
            "arguments": call.arguments_json(),
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::types::{Attachment, ThinkingConfig, ToolCall, ToolSpec};

    /// A history with an attachment and one completed tool round
    pub(crate) fn tool_round_request(provider: Provider) -> ChatRequest {
        let call = ToolCall {
            continuity_token: Some("sig-1".into()),
            ..ToolCall::new("call_1", "get_date_time", serde_json::json!({"tz": "UTC"}), provider)
        };
        let result = ToolExecutionResult::success("2026-10-16T12:00:00Z");
        ChatRequest::new(
            "model-x",
            vec![
                ConversationTurn::user_with_attachments(
                    "What time is it?",
                    vec![Attachment::from_bytes("image/png", b"png")],
                ),
                ConversationTurn::tool_call(
                    call,
                    result.clone(),
                    "Let me check.",
                    Some("Need a clock".into()),
                ),
                ConversationTurn::tool_response("call_1", &result),
            ],
        )
        .with_system("Be brief.")
        .with_tools(vec![ToolSpec::new(
            "get_date_time",
            "Current date and time",
            serde_json::json!({"type": "object", "properties": {"tz": {"type": "string"}}}),
        )])
        .with_thinking(ThinkingConfig::enabled(4096))
        .with_temperature(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fake::FakeHttp;
    use crate::stream::NullSink;

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(401, r#"{"error":{"message":"Invalid API key","type":"auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(extract_error_message(400, r#"{"message":"bad model"}"#), "bad model");
        assert_eq!(extract_error_message(400, r#"{"error":"plain"}"#), "plain");
        assert_eq!(extract_error_message(422, r#"{"detail":"nope"}"#), "nope");
        assert_eq!(
            extract_error_message(429, r#"[{"error":{"code":429,"message":"quota"}}]"#),
            "quota"
        );
        assert_eq!(extract_error_message(502, "Bad Gateway"), "Bad Gateway");
        assert_eq!(extract_error_message(503, "  "), "HTTP 503");
    }

    #[test]
    fn test_create_adapter_requires_key() {
        let http: Arc<dyn HttpClient> = Arc::new(FakeHttp::default());
        let err = create_adapter(ProviderConfig::new(Provider::Cohere, " "), http.clone());
        assert!(matches!(err, Err(Error::InvalidApiKey(_))));

        let adapter = create_adapter(ProviderConfig::new(Provider::Poe, "k"), http).unwrap();
        assert_eq!(adapter.provider(), Provider::Poe);
    }

    #[tokio::test]
    async fn test_error_status_becomes_outcome() {
        let http = FakeHttp::default().reply(401, r#"{"error":{"message":"Invalid API key"}}"#);
        let outcome = run_stream(
            &http,
            HttpRequest::new("https://x", Value::Null),
            Provider::Anthropic,
            false,
            &SseOptions::default(),
            &NullSink,
        )
        .await;
        assert_eq!(
            outcome,
            StreamOutcome::error("Anthropic API error (401): Invalid API key")
        );
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_outcome() {
        let http = FakeHttp::default().fail("connection reset");
        let outcome = run_stream(
            &http,
            HttpRequest::new("https://x", Value::Null),
            Provider::Google,
            false,
            &SseOptions::default(),
            &NullSink,
        )
        .await;
        match outcome {
            StreamOutcome::Error { message } => {
                assert!(message.starts_with("Google request failed"));
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected Error, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_lookup() {
        let request = test_support::tool_round_request(Provider::OpenAI);
        assert!(tool_result_for(&request.turns, "call_1").is_some());
        assert!(tool_result_for(&request.turns, "other").is_none());
    }
}
