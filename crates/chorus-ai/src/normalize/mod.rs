//! Provider event normalizers
//!
//! Each provider family streams its own JSON shapes. A [`Normalizer`] consumes
//! those records through the [`SseHandler`] interface, forwards text and
//! reasoning deltas to an [`EventSink`] as they arrive, and reduces the whole
//! stream to one [`StreamOutcome`].

mod anthropic;
mod chat_completions;
mod cohere;
mod gemini;
mod openai_responses;
mod thinking;
mod tool_calls;

use serde_json::Value;

use crate::sse::{Action, SseHandler};
use crate::stream::{EventSink, ProviderEvent, StreamOutcome};
use crate::types::Provider;

use self::thinking::ThinkingTracker;
use self::tool_calls::ToolCallAccumulator;

/// Wire dialect spoken by a provider's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAiResponses,
    ChatCompletions,
    Anthropic,
    Gemini,
    Cohere,
}

impl Dialect {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::OpenAI => Dialect::OpenAiResponses,
            Provider::Poe | Provider::OpenAICompatible => Dialect::ChatCompletions,
            Provider::Anthropic => Dialect::Anthropic,
            Provider::Google => Dialect::Gemini,
            Provider::Cohere => Dialect::Cohere,
        }
    }
}

/// State common to every dialect
pub(crate) struct StreamState {
    provider: Provider,
    text: String,
    thinking: ThinkingTracker,
    tool_calls: ToolCallAccumulator,
    error: Option<String>,
    parse_errors: usize,
}

impl StreamState {
    fn new(provider: Provider, thinking_requested: bool) -> Self {
        Self {
            provider,
            text: String::new(),
            thinking: ThinkingTracker::new(thinking_requested),
            tool_calls: ToolCallAccumulator::default(),
            error: None,
            parse_errors: 0,
        }
    }

    pub(crate) fn push_text(&mut self, delta: &str, sink: &dyn EventSink) {
        if delta.is_empty() {
            return;
        }
        self.thinking.close(sink);
        self.text.push_str(delta);
        sink.emit(ProviderEvent::PartialResponse {
            text: delta.to_string(),
        });
    }

    pub(crate) fn push_thinking(&mut self, delta: &str, sink: &dyn EventSink) {
        self.thinking.delta(delta, sink);
    }

    /// Any tool-call activity closes the reasoning phase
    pub(crate) fn tool_calls(&mut self, sink: &dyn EventSink) -> &mut ToolCallAccumulator {
        self.thinking.close(sink);
        &mut self.tool_calls
    }

    /// Record an in-band error; the first one wins
    pub(crate) fn fail(&mut self, message: impl Into<String>) -> Action {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
        Action::Error
    }

    pub(crate) fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.tool_calls.is_empty()
    }

    fn finish(mut self, sink: &dyn EventSink) -> StreamOutcome {
        self.thinking.close(sink);
        if self.parse_errors > 0 {
            tracing::debug!(
                "{} stream finished after skipping {} malformed chunk(s)",
                self.provider.name(),
                self.parse_errors
            );
        }

        if let Some(message) = self.error {
            return StreamOutcome::Error { message };
        }
        let thinking = self.thinking.info();
        if let Some(call) = self.tool_calls.detected(self.provider) {
            return StreamOutcome::ToolCallDetected {
                call,
                preceding_text: self.text,
                thinking,
            };
        }
        if !self.text.is_empty() {
            return StreamOutcome::TextComplete {
                text: self.text,
                thinking,
            };
        }
        StreamOutcome::error(format!("Empty response from {}", self.provider.name()))
    }
}

/// Per-dialect bookkeeping on top of [`StreamState`]
enum DialectState {
    OpenAiResponses,
    ChatCompletions,
    Anthropic(anthropic::AnthropicState),
    Gemini(gemini::GeminiState),
    Cohere,
}

/// Stream normalizer for one provider call
pub struct Normalizer<'s> {
    dialect: DialectState,
    state: StreamState,
    sink: &'s dyn EventSink,
}

impl<'s> Normalizer<'s> {
    pub fn new(provider: Provider, thinking_requested: bool, sink: &'s dyn EventSink) -> Self {
        let dialect = match Dialect::for_provider(provider) {
            Dialect::OpenAiResponses => DialectState::OpenAiResponses,
            Dialect::ChatCompletions => DialectState::ChatCompletions,
            Dialect::Anthropic => DialectState::Anthropic(anthropic::AnthropicState::default()),
            Dialect::Gemini => DialectState::Gemini(gemini::GeminiState::default()),
            Dialect::Cohere => DialectState::Cohere,
        };
        Self {
            dialect,
            state: StreamState::new(provider, thinking_requested),
            sink,
        }
    }

    /// Feed a complete (non-streaming) response body through the same
    /// accumulation rules as the stream.
    pub fn ingest_response(&mut self, body: &Value) {
        match self.dialect {
            DialectState::OpenAiResponses => {
                openai_responses::ingest_response(&mut self.state, self.sink, body);
            }
            DialectState::ChatCompletions => {
                chat_completions::ingest_response(&mut self.state, self.sink, body);
            }
            _ => {
                self.state.fail(format!(
                    "Non-streaming responses are not supported for {}",
                    self.state.provider.name()
                ));
            }
        }
    }

    /// Record a failure that happened outside the event stream
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state.fail(message);
    }

    /// Reduce the stream to its outcome: error, then tool call, then text.
    pub fn finish(self) -> StreamOutcome {
        self.state.finish(self.sink)
    }
}

impl SseHandler for Normalizer<'_> {
    fn on_event(&mut self, event_type: Option<&str>, data: Value) -> Action {
        let sink = self.sink;
        let state = &mut self.state;
        match &mut self.dialect {
            DialectState::OpenAiResponses => {
                openai_responses::on_event(state, sink, event_type, &data)
            }
            DialectState::ChatCompletions => chat_completions::on_event(state, sink, &data),
            DialectState::Anthropic(s) => s.on_event(state, sink, event_type, &data),
            DialectState::Gemini(s) => s.on_event(state, sink, &data),
            DialectState::Cohere => cohere::on_event(state, sink, &data),
        }
    }

    fn on_parse_error(&mut self, line: &str, error: &serde_json::Error) {
        self.state.parse_errors += 1;
        tracing::warn!(
            "{}: malformed stream chunk skipped ({}): {}",
            self.state.provider.name(),
            error,
            line
        );
    }

    fn on_stream_end(&mut self) {
        self.state.thinking.close(self.sink);
    }
}

/// Extract an error message from an in-band error object or string
pub(crate) fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| obj.get("error").and_then(error_message))
            .or_else(|| obj.get("detail").and_then(error_message)),
        _ => None,
    }
}

/// String field accessor that treats `null` as absent
pub(crate) fn str_field<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}
