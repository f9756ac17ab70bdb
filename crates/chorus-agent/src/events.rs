//! Events broadcast by the supervisor

use chorus_ai::{ConversationTurn, ProviderEvent, ThinkingInfo, ToolCall};
use serde::{Deserialize, Serialize};

/// Lifecycle of one orchestrated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Cancelled
        )
    }
}

/// An observable occurrence for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub request_id: String,
    pub chat_id: String,
    #[serde(flatten)]
    pub kind: StreamEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEventKind {
    /// Answer text delta
    PartialResponse { text: String },

    ThinkingStarted,
    ThinkingPartial { text: String },
    ThinkingComplete { text: String, duration_ms: u64 },

    /// The model wants a tool run; answer with `provide_tool_result`
    ToolCallRequest {
        call: ToolCall,
        preceding_text: String,
    },

    /// A tool round was appended to the history
    MessagesAdded { turns: Vec<ConversationTurn> },

    /// Final answer
    Complete { text: String, thinking: ThinkingInfo },

    Error { message: String },

    StatusChange { status: RequestStatus },
}

impl StreamEvent {
    pub fn new(
        request_id: impl Into<String>,
        chat_id: impl Into<String>,
        kind: StreamEventKind,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            chat_id: chat_id.into(),
            kind,
        }
    }

    /// Whether this is the last event of its request
    pub fn is_terminal(&self) -> bool {
        matches!(&self.kind, StreamEventKind::StatusChange { status } if status.is_terminal())
    }
}

impl From<ProviderEvent> for StreamEventKind {
    fn from(event: ProviderEvent) -> Self {
        match event {
            ProviderEvent::PartialResponse { text } => StreamEventKind::PartialResponse { text },
            ProviderEvent::ThinkingStarted => StreamEventKind::ThinkingStarted,
            ProviderEvent::ThinkingPartial { text } => StreamEventKind::ThinkingPartial { text },
            ProviderEvent::ThinkingComplete { text, duration_ms } => {
                StreamEventKind::ThinkingComplete { text, duration_ms }
            }
        }
    }
}
