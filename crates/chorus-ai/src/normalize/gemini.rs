//! Gemini `streamGenerateContent?alt=sse` chunks

use serde_json::Value;

use super::{StreamState, error_message, str_field};
use crate::sse::Action;
use crate::stream::EventSink;

const BLOCKED_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

#[derive(Debug, Default)]
pub(crate) struct GeminiState {
    /// Function calls seen so far; Gemini sends each one whole
    calls: usize,
    /// Thought signature from a part that preceded the function call
    signature: Option<String>,
}

impl GeminiState {
    pub(crate) fn on_event(
        &mut self,
        state: &mut StreamState,
        sink: &dyn EventSink,
        data: &Value,
    ) -> Action {
        if let Some(error) = data.get("error").filter(|e| !e.is_null()) {
            let message = error_message(error).unwrap_or_else(|| error.to_string());
            return state.fail(message);
        }
        if let Some(reason) = str_field(data, "/promptFeedback/blockReason") {
            return state.fail(format!("Prompt blocked by Google: {}", reason));
        }

        let Some(candidate) = data.pointer("/candidates/0") else {
            return Action::Continue;
        };

        let parts = candidate.pointer("/content/parts").and_then(Value::as_array);
        for part in parts.into_iter().flatten() {
            self.apply_part(state, sink, part);
        }

        let Some(reason) = str_field(candidate, "/finishReason") else {
            return Action::Continue;
        };
        if state.has_content() {
            return Action::Stop;
        }
        if BLOCKED_REASONS.contains(&reason) {
            return state.fail(format!("Response blocked by Google: {}", reason));
        }
        if reason == "MALFORMED_FUNCTION_CALL" {
            return state.fail("Google returned a malformed function call");
        }
        Action::Stop
    }

    fn apply_part(&mut self, state: &mut StreamState, sink: &dyn EventSink, part: &Value) {
        let signature = str_field(part, "/thoughtSignature");

        if let Some(call) = part.get("functionCall") {
            let key = self.calls.to_string();
            let id = str_field(call, "/id")
                .map(str::to_string)
                .unwrap_or_else(|| format!("gemini_call_{}", self.calls));
            self.calls += 1;

            let arguments = call
                .get("args")
                .filter(|args| !args.is_null())
                .map(Value::to_string)
                .unwrap_or_default();
            let token = signature.map(str::to_string).or_else(|| self.signature.take());

            let acc = state.tool_calls(sink);
            acc.set_id(&key, &id);
            acc.set_name(&key, str_field(call, "/name").unwrap_or_default());
            acc.set_arguments(&key, &arguments);
            if let Some(token) = token {
                acc.set_continuity_token(&key, &token);
            }
            return;
        }

        if let Some(signature) = signature {
            self.signature = Some(signature.to_string());
        }

        let Some(text) = str_field(part, "/text") else {
            return;
        };
        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            state.push_thinking(text, sink);
        } else {
            state.push_text(text, sink);
        }
    }
}
