//! Anthropic Messages API stream events

use serde_json::Value;

use super::{StreamState, error_message, str_field};
use crate::sse::Action;
use crate::stream::EventSink;

#[derive(Debug, Default)]
pub(crate) struct AnthropicState {
    /// Signature of the most recent thinking block, echoed back with the
    /// next tool call.
    signature: Option<String>,
}

fn block_key(data: &Value) -> String {
    data.get("index")
        .and_then(Value::as_u64)
        .unwrap_or(0)
        .to_string()
}

impl AnthropicState {
    pub(crate) fn on_event(
        &mut self,
        state: &mut StreamState,
        sink: &dyn EventSink,
        event_type: Option<&str>,
        data: &Value,
    ) -> Action {
        let kind = str_field(data, "/type").or(event_type).unwrap_or_default();

        match kind {
            "content_block_start" => {
                let Some(block) = data.get("content_block") else {
                    return Action::Continue;
                };
                match str_field(block, "/type") {
                    Some("text") => {
                        state.push_text(str_field(block, "/text").unwrap_or_default(), sink)
                    }
                    Some("thinking") => {
                        state.push_thinking(str_field(block, "/thinking").unwrap_or_default(), sink)
                    }
                    Some("tool_use") => {
                        let key = block_key(data);
                        let signature = self.signature.clone();
                        let calls = state.tool_calls(sink);
                        calls.set_id(&key, str_field(block, "/id").unwrap_or_default());
                        calls.set_name(&key, str_field(block, "/name").unwrap_or_default());
                        if let Some(input) = block
                            .get("input")
                            .and_then(Value::as_object)
                            .filter(|input| !input.is_empty())
                        {
                            calls.set_arguments(&key, &Value::Object(input.clone()).to_string());
                        }
                        if let Some(signature) = signature {
                            calls.set_continuity_token(&key, &signature);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let Some(delta) = data.get("delta") else {
                    return Action::Continue;
                };
                match str_field(delta, "/type") {
                    Some("text_delta") => {
                        state.push_text(str_field(delta, "/text").unwrap_or_default(), sink)
                    }
                    Some("thinking_delta") => {
                        state.push_thinking(str_field(delta, "/thinking").unwrap_or_default(), sink)
                    }
                    Some("signature_delta") => {
                        if let Some(signature) = str_field(delta, "/signature") {
                            self.signature = Some(signature.to_string());
                        }
                    }
                    Some("input_json_delta") => {
                        let fragment = str_field(delta, "/partial_json").unwrap_or_default();
                        state.tool_calls(sink).append_arguments(&block_key(data), fragment);
                    }
                    _ => {}
                }
            }
            "message_stop" => return Action::Stop,
            "error" => {
                let message = error_message(data)
                    .unwrap_or_else(|| "Anthropic stream error".to_string());
                return state.fail(message);
            }
            // message_start, message_delta, content_block_stop, ping
            _ => {}
        }
        Action::Continue
    }
}
