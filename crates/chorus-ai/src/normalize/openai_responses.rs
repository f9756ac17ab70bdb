//! OpenAI Responses API stream events

use serde_json::Value;

use super::{StreamState, error_message, str_field};
use crate::sse::Action;
use crate::stream::EventSink;

/// Key a function_call item by its item id, falling back to its output index
fn item_key(data: &Value, item_id: Option<&str>) -> String {
    match item_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => data
            .get("output_index")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .to_string(),
    }
}

fn apply_function_call_item(
    state: &mut StreamState,
    sink: &dyn EventSink,
    data: &Value,
    item: &Value,
) {
    let key = item_key(data, str_field(item, "/id"));
    let calls = state.tool_calls(sink);
    calls.set_id(&key, str_field(item, "/call_id").unwrap_or_default());
    calls.set_name(&key, str_field(item, "/name").unwrap_or_default());
    calls.set_arguments(&key, str_field(item, "/arguments").unwrap_or_default());
}

pub(super) fn on_event(
    state: &mut StreamState,
    sink: &dyn EventSink,
    event_type: Option<&str>,
    data: &Value,
) -> Action {
    let kind = str_field(data, "/type").or(event_type).unwrap_or_default();

    match kind {
        "response.output_text.delta" | "response.refusal.delta" => {
            state.push_text(str_field(data, "/delta").unwrap_or_default(), sink);
        }
        "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
            state.push_thinking(str_field(data, "/delta").unwrap_or_default(), sink);
        }
        "response.output_item.added" | "response.output_item.done" => {
            if let Some(item) = data.get("item") {
                if str_field(item, "/type") == Some("function_call") {
                    apply_function_call_item(state, sink, data, item);
                }
            }
        }
        "response.function_call_arguments.delta" => {
            let key = item_key(data, str_field(data, "/item_id"));
            let delta = str_field(data, "/delta").unwrap_or_default();
            state.tool_calls(sink).append_arguments(&key, delta);
        }
        "response.function_call_arguments.done" => {
            let key = item_key(data, str_field(data, "/item_id"));
            let arguments = str_field(data, "/arguments").unwrap_or_default();
            state.tool_calls(sink).set_arguments(&key, arguments);
        }
        "response.completed" => {
            // Some relays only deliver the final response object.
            if !state.has_content() {
                if let Some(response) = data.get("response") {
                    ingest_response(state, sink, response);
                }
            }
            return Action::Stop;
        }
        "response.incomplete" => {
            if !state.has_content() {
                let reason = str_field(data, "/response/incomplete_details/reason")
                    .unwrap_or("unknown reason");
                return state.fail(format!("Response incomplete: {}", reason));
            }
            return Action::Stop;
        }
        "response.failed" => {
            let message = data
                .pointer("/response/error")
                .and_then(error_message)
                .unwrap_or_else(|| "OpenAI response failed".to_string());
            return state.fail(message);
        }
        "error" => {
            let message = error_message(data).unwrap_or_else(|| "OpenAI stream error".to_string());
            return state.fail(message);
        }
        _ => {}
    }
    Action::Continue
}

/// Apply a complete response object (`stream: false` body or the payload of
/// `response.completed`).
pub(super) fn ingest_response(state: &mut StreamState, sink: &dyn EventSink, response: &Value) {
    if let Some(message) = response.get("error").filter(|e| !e.is_null()).and_then(error_message) {
        state.fail(message);
        return;
    }

    let Some(output) = response.get("output").and_then(Value::as_array) else {
        return;
    };

    for (index, item) in output.iter().enumerate() {
        match str_field(item, "/type") {
            Some("reasoning") => {
                let summary = item
                    .get("summary")
                    .and_then(Value::as_array)
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|p| str_field(p, "/text"))
                            .collect::<Vec<_>>()
                            .join("\n\n")
                    })
                    .unwrap_or_default();
                state.push_thinking(&summary, sink);
            }
            Some("message") => {
                let parts = item.get("content").and_then(Value::as_array);
                for part in parts.into_iter().flatten() {
                    if let Some(text) = str_field(part, "/text") {
                        state.push_text(text, sink);
                    }
                }
            }
            Some("function_call") => {
                let position = serde_json::json!({ "output_index": index });
                apply_function_call_item(state, sink, &position, item);
            }
            _ => {}
        }
    }
}
