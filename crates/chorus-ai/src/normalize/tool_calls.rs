//! Assembly of streamed tool calls from incremental fragments

use crate::types::{Provider, ToolCall};

#[derive(Debug, Default)]
struct PartialCall {
    key: String,
    id: String,
    name: String,
    arguments: String,
    continuity_token: Option<String>,
}

impl PartialCall {
    /// Parsed arguments once the call is complete
    fn parameters(&self) -> Option<serde_json::Value> {
        if self.id.is_empty() || self.name.is_empty() {
            return None;
        }
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Some(serde_json::json!({}));
        }
        serde_json::from_str(raw).ok()
    }
}

/// Partially assembled calls keyed by the provider's index or item id, kept
/// in order of first appearance.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAccumulator {
    calls: Vec<PartialCall>,
}

impl ToolCallAccumulator {
    fn entry(&mut self, key: &str) -> &mut PartialCall {
        let pos = match self.calls.iter().position(|c| c.key == key) {
            Some(pos) => pos,
            None => {
                self.calls.push(PartialCall {
                    key: key.to_string(),
                    ..PartialCall::default()
                });
                self.calls.len() - 1
            }
        };
        &mut self.calls[pos]
    }

    pub(crate) fn set_id(&mut self, key: &str, id: &str) {
        if !id.is_empty() {
            self.entry(key).id = id.to_string();
        }
    }

    pub(crate) fn set_name(&mut self, key: &str, name: &str) {
        if !name.is_empty() {
            self.entry(key).name = name.to_string();
        }
    }

    pub(crate) fn append_arguments(&mut self, key: &str, fragment: &str) {
        self.entry(key).arguments.push_str(fragment);
    }

    /// Replace the buffer with the provider's final argument string
    pub(crate) fn set_arguments(&mut self, key: &str, arguments: &str) {
        if !arguments.is_empty() {
            self.entry(key).arguments = arguments.to_string();
        }
    }

    pub(crate) fn set_continuity_token(&mut self, key: &str, token: &str) {
        if !token.is_empty() {
            self.entry(key).continuity_token = Some(token.to_string());
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// First complete call. Further calls in the same stream are dropped.
    pub(crate) fn detected(&self, provider: Provider) -> Option<ToolCall> {
        let mut complete = self
            .calls
            .iter()
            .filter_map(|c| c.parameters().map(|params| (c, params)));

        let (first, parameters) = complete.next()?;
        let dropped = complete.count();
        if dropped > 0 {
            tracing::debug!(
                "{} streamed {} additional tool call(s); only '{}' is executed",
                provider.name(),
                dropped,
                first.name
            );
        }

        for incomplete in self.calls.iter().filter(|c| c.parameters().is_none()) {
            tracing::warn!(
                "Discarding incomplete tool call '{}' (id '{}'): arguments {:?}",
                incomplete.name,
                incomplete.id,
                incomplete.arguments
            );
        }

        Some(ToolCall {
            id: first.id.clone(),
            tool_id: first.name.clone(),
            parameters,
            provider,
            continuity_token: first.continuity_token.clone(),
        })
    }
}
