//! Streaming side-effects and the terminal outcome of one provider call

use serde::{Deserialize, Serialize};

use crate::types::ToolCall;

/// Events forwarded while a provider stream is being read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// A text delta of the answer
    PartialResponse { text: String },
    /// First reasoning delta of this call
    ThinkingStarted,
    /// Reasoning delta
    ThinkingPartial { text: String },
    /// Reasoning phase closed
    ThinkingComplete { text: String, duration_ms: u64 },
}

/// Receiver of [`ProviderEvent`]s, called in stream order from a single reader.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProviderEvent);
}

impl<F> EventSink for F
where
    F: Fn(ProviderEvent) + Send + Sync,
{
    fn emit(&self, event: ProviderEvent) {
        self(event)
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<ProviderEvent> {
    fn emit(&self, event: ProviderEvent) {
        let _ = self.send(event);
    }
}

/// Sink that drops everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProviderEvent) {}
}

/// Terminal state of the reasoning phase of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStatus {
    /// Reasoning was not asked for and none arrived
    #[default]
    NotRequested,
    /// A reasoning phase ran and closed
    Complete,
    /// Reasoning was requested but the stream carried none
    Unavailable,
}

/// Reasoning summary attached to a successful outcome
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingInfo {
    pub status: ThinkingStatus,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub duration_ms: u64,
}

impl ThinkingInfo {
    /// Reasoning text, if a phase completed with content
    pub fn thoughts(&self) -> Option<String> {
        match self.status {
            ThinkingStatus::Complete if !self.text.is_empty() => Some(self.text.clone()),
            _ => None,
        }
    }
}

/// Terminal result of one provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamOutcome {
    TextComplete {
        text: String,
        thinking: ThinkingInfo,
    },
    ToolCallDetected {
        call: ToolCall,
        preceding_text: String,
        thinking: ThinkingInfo,
    },
    Error {
        message: String,
    },
}

impl StreamOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text produced by the call (final or preceding a tool call)
    pub fn text(&self) -> &str {
        match self {
            Self::TextComplete { text, .. } => text,
            Self::ToolCallDetected { preceding_text, .. } => preceding_text,
            Self::Error { .. } => "",
        }
    }
}
