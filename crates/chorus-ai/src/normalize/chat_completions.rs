//! Chat-completions chunks (Poe and OpenAI-compatible endpoints)

use serde_json::Value;

use super::{StreamState, error_message, str_field};
use crate::sse::Action;
use crate::stream::EventSink;

fn index_key(call: &Value, position: usize) -> String {
    call.get("index")
        .and_then(Value::as_u64)
        .map(|i| i.to_string())
        .unwrap_or_else(|| position.to_string())
}

/// Reasoning text appears under different names depending on the relay
fn reasoning_of(delta: &Value) -> Option<&str> {
    str_field(delta, "/reasoning_content")
        .or_else(|| str_field(delta, "/reasoning"))
        .or_else(|| str_field(delta, "/thinking"))
}

pub(super) fn on_event(state: &mut StreamState, sink: &dyn EventSink, data: &Value) -> Action {
    if let Some(error) = data.get("error").filter(|e| !e.is_null()) {
        let message = error_message(error).unwrap_or_else(|| error.to_string());
        return state.fail(message);
    }

    let Some(choice) = data.pointer("/choices/0") else {
        return Action::Continue;
    };

    if let Some(delta) = choice.get("delta") {
        if let Some(reasoning) = reasoning_of(delta) {
            state.push_thinking(reasoning, sink);
        }
        if let Some(content) = str_field(delta, "/content") {
            state.push_text(content, sink);
        }
        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            let acc = state.tool_calls(sink);
            for (position, call) in calls.iter().enumerate() {
                let key = index_key(call, position);
                if let Some(id) = str_field(call, "/id") {
                    acc.set_id(&key, id);
                }
                if let Some(name) = str_field(call, "/function/name") {
                    acc.set_name(&key, name);
                }
                if let Some(fragment) = str_field(call, "/function/arguments") {
                    acc.append_arguments(&key, fragment);
                }
            }
        }
    }

    match str_field(choice, "/finish_reason") {
        Some("content_filter") if !state.has_content() => {
            state.fail("Response blocked by content filter")
        }
        Some(_) => Action::Stop,
        None => Action::Continue,
    }
}

/// Apply a `stream: false` chat-completions body
pub(super) fn ingest_response(state: &mut StreamState, sink: &dyn EventSink, body: &Value) {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        state.fail(error_message(error).unwrap_or_else(|| error.to_string()));
        return;
    }
    let Some(message) = body.pointer("/choices/0/message") else {
        return;
    };

    if let Some(reasoning) = reasoning_of(message) {
        state.push_thinking(reasoning, sink);
    }
    if let Some(content) = str_field(message, "/content") {
        state.push_text(content, sink);
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        let acc = state.tool_calls(sink);
        for (position, call) in calls.iter().enumerate() {
            let key = position.to_string();
            acc.set_id(&key, str_field(call, "/id").unwrap_or_default());
            acc.set_name(&key, str_field(call, "/function/name").unwrap_or_default());
            acc.set_arguments(&key, str_field(call, "/function/arguments").unwrap_or_default());
        }
    }
}
