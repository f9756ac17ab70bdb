//! Cohere v2 chat stream events

use serde_json::Value;

use super::{StreamState, error_message, str_field};
use crate::sse::Action;
use crate::stream::EventSink;

fn call_key(data: &Value) -> String {
    data.get("index")
        .and_then(Value::as_u64)
        .unwrap_or(0)
        .to_string()
}

pub(super) fn on_event(state: &mut StreamState, sink: &dyn EventSink, data: &Value) -> Action {
    match str_field(data, "/type").unwrap_or_default() {
        "content-delta" => {
            if let Some(thinking) = str_field(data, "/delta/message/content/thinking") {
                state.push_thinking(thinking, sink);
            }
            if let Some(text) = str_field(data, "/delta/message/content/text") {
                state.push_text(text, sink);
            }
        }
        "tool-plan-delta" => {
            if let Some(plan) = str_field(data, "/delta/message/tool_plan") {
                state.push_thinking(plan, sink);
            }
        }
        "tool-call-start" => {
            let key = call_key(data);
            let Some(call) = data.pointer("/delta/message/tool_calls") else {
                return Action::Continue;
            };
            let acc = state.tool_calls(sink);
            acc.set_id(&key, str_field(call, "/id").unwrap_or_default());
            acc.set_name(&key, str_field(call, "/function/name").unwrap_or_default());
            acc.append_arguments(&key, str_field(call, "/function/arguments").unwrap_or_default());
        }
        "tool-call-delta" => {
            let key = call_key(data);
            let fragment = str_field(data, "/delta/message/tool_calls/function/arguments")
                .unwrap_or_default();
            state.tool_calls(sink).append_arguments(&key, fragment);
        }
        "message-end" => {
            return match str_field(data, "/delta/finish_reason") {
                Some("ERROR") => {
                    let message = data
                        .pointer("/delta/error")
                        .and_then(error_message)
                        .unwrap_or_else(|| "Cohere reported an error".to_string());
                    state.fail(message)
                }
                _ => Action::Stop,
            };
        }
        "error" => {
            let message = error_message(data).unwrap_or_else(|| "Cohere stream error".to_string());
            return state.fail(message);
        }
        // message-start, content-start, content-end, tool-call-end, citations
        _ => {}
    }
    Action::Continue
}
