//! Bounded tool-calling loop
//!
//! Drives a provider adapter until it produces a final answer. Every
//! detected tool call is resolved through a [`ToolExecutor`] and folded into
//! the history as a tool_call/tool_response pair before the next call.

use chorus_ai::{
    ChatRequest, ConversationTurn, EventSink, ProviderAdapter, StreamOutcome, ThinkingInfo,
};

use crate::tool::ToolExecutor;

/// Hooks into loop progress
pub trait LoopObserver: Send + Sync {
    /// A provider call is about to start (0-based)
    fn iteration_started(&self, _iteration: usize) {}

    /// A completed tool round was appended to the history
    fn turns_added(&self, _turns: &[ConversationTurn]) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl LoopObserver for NoopObserver {}

/// How the loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Done { text: String, thinking: ThinkingInfo },
    Failed { message: String },
    DepthExceeded { max_tool_depth: usize },
}

impl LoopOutcome {
    /// Error message for the failure variants
    pub fn error_message(&self) -> Option<String> {
        match self {
            LoopOutcome::Done { .. } => None,
            LoopOutcome::Failed { message } => Some(message.clone()),
            LoopOutcome::DepthExceeded { max_tool_depth } => Some(format!(
                "Maximum tool calling iterations ({}) reached",
                max_tool_depth
            )),
        }
    }
}

/// Collaborators of one loop run
pub struct ToolLoop<'a> {
    pub adapter: &'a dyn ProviderAdapter,
    pub executor: &'a dyn ToolExecutor,
    pub sink: &'a dyn EventSink,
    pub observer: &'a dyn LoopObserver,
    /// Maximum number of provider calls
    pub max_tool_depth: usize,
}

impl ToolLoop<'_> {
    pub async fn run(&self, mut request: ChatRequest) -> LoopOutcome {
        let provider = self.adapter.provider();

        for iteration in 0..self.max_tool_depth {
            self.observer.iteration_started(iteration);
            tracing::debug!(
                "{} call {} of at most {} ({} turns)",
                provider,
                iteration + 1,
                self.max_tool_depth,
                request.turns.len()
            );

            match self.adapter.stream(&request, self.sink).await {
                StreamOutcome::TextComplete { text, thinking } => {
                    return LoopOutcome::Done { text, thinking };
                }
                StreamOutcome::Error { message } => {
                    return LoopOutcome::Failed { message };
                }
                StreamOutcome::ToolCallDetected {
                    call,
                    preceding_text,
                    thinking,
                } => {
                    if iteration + 1 >= self.max_tool_depth {
                        tracing::warn!(
                            "Tool call '{}' detected on the last permitted call; not executing",
                            call.tool_id
                        );
                        break;
                    }

                    let result = self.executor.execute(&call, &preceding_text).await;
                    let call_id = call.id.clone();
                    let turns = [
                        ConversationTurn::tool_call(
                            call,
                            result.clone(),
                            preceding_text,
                            thinking.thoughts(),
                        ),
                        ConversationTurn::tool_response(call_id, &result),
                    ];
                    request.turns.extend(turns.iter().cloned());
                    self.observer.turns_added(&turns);
                }
            }
        }

        LoopOutcome::DepthExceeded {
            max_tool_depth: self.max_tool_depth,
        }
    }
}
