//! Concurrent request supervisor
//!
//! Each started request runs the tool-calling loop on its own tokio task.
//! The supervisor tracks active requests, brokers the tool-result handshake
//! with whoever executes tools, and broadcasts every event to any number of
//! subscribers. Subscribers come and go freely; a slow one loses the oldest
//! events instead of stalling producers.

use async_trait::async_trait;
use chorus_ai::{
    AdapterFactory, Attachment, ChatRequest, ConversationTurn, EventSink, Provider,
    ProviderConfig, ProviderEvent, Role, ThinkingConfig, ToolCall, ToolExecutionResult, ToolSpec,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{RequestStatus, StreamEvent, StreamEventKind};
use crate::tool::ToolExecutor;
use crate::tool_loop::{LoopObserver, LoopOutcome, ToolLoop};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum provider calls per request
    pub max_tool_depth: usize,
    /// How long a tool call waits for `provide_tool_result`
    pub tool_result_timeout: Duration,
    /// Broadcast buffer per subscriber
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_tool_depth: 5,
            tool_result_timeout: Duration::from_secs(5 * 60),
            event_capacity: 1024,
        }
    }
}

/// Everything needed to start one request
#[derive(Debug, Clone)]
pub struct StartRequest {
    /// Generated when absent
    pub request_id: Option<String>,
    pub chat_id: String,
    pub provider: ProviderConfig,
    pub model: String,
    pub system_prompt: Option<String>,
    pub history: Vec<ConversationTurn>,
    /// Attached to the last user turn of `history`
    pub attachments: Vec<Attachment>,
    pub tools: Vec<ToolSpec>,
    pub thinking: ThinkingConfig,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl StartRequest {
    pub fn new(
        chat_id: impl Into<String>,
        provider: ProviderConfig,
        model: impl Into<String>,
        history: Vec<ConversationTurn>,
    ) -> Self {
        Self {
            request_id: None,
            chat_id: chat_id.into(),
            provider,
            model: model.into(),
            system_prompt: None,
            history,
            attachments: vec![],
            tools: vec![],
            thinking: ThinkingConfig::default(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    fn into_chat_request(self) -> Result<ChatRequest> {
        let mut turns = self.history;
        if !self.attachments.is_empty() {
            let last_user = turns
                .iter_mut()
                .rev()
                .find(|t| t.role == Role::User)
                .ok_or_else(|| Error::InvalidRequest("attachments require a user turn".into()))?;
            last_user.attachments.extend(self.attachments);
        }

        Ok(ChatRequest {
            model: self.model,
            system_prompt: self.system_prompt,
            turns,
            tools: self.tools,
            thinking: self.thinking,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

/// Snapshot of one active request
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub chat_id: String,
    pub provider: Provider,
    pub model: String,
    pub status: RequestStatus,
    /// Answer text of the current provider call
    pub accumulated_text: String,
    pub created_at: DateTime<Utc>,
}

struct ActiveRequest {
    record: RequestRecord,
    cancel: CancellationToken,
}

struct Inner {
    config: SupervisorConfig,
    factory: Arc<dyn AdapterFactory>,
    active: DashMap<String, ActiveRequest>,
    pending_tools: DashMap<String, oneshot::Sender<ToolExecutionResult>>,
    events: broadcast::Sender<StreamEvent>,
    active_count: watch::Sender<usize>,
}

impl Inner {
    fn broadcast(&self, request_id: &str, chat_id: &str, kind: StreamEventKind) {
        // No subscribers is fine
        let _ = self.events.send(StreamEvent::new(request_id, chat_id, kind));
    }

    fn publish_count(&self) {
        self.active_count.send_replace(self.active.len());
    }

    /// Remove a request and release any tool call it is waiting on
    fn remove(&self, request_id: &str) -> Option<ActiveRequest> {
        let (_, active) = self.active.remove(request_id)?;
        active.cancel.cancel();
        // Dropping the sender wakes the waiting executor
        self.pending_tools.remove(request_id);
        self.publish_count();
        Some(active)
    }

    fn finish(&self, request_id: &str, chat_id: &str, outcome: LoopOutcome) {
        // A concurrent cancel already owns the terminal event
        if self.remove(request_id).is_none() {
            return;
        }

        let status = match outcome.error_message() {
            None => {
                if let LoopOutcome::Done { text, thinking } = outcome {
                    tracing::info!("Request {} completed ({} chars)", request_id, text.len());
                    let complete = StreamEventKind::Complete { text, thinking };
                    self.broadcast(request_id, chat_id, complete);
                }
                RequestStatus::Completed
            }
            Some(message) => {
                tracing::info!("Request {} failed: {}", request_id, message);
                self.broadcast(request_id, chat_id, StreamEventKind::Error { message });
                RequestStatus::Failed
            }
        };
        self.broadcast(request_id, chat_id, StreamEventKind::StatusChange { status });
    }
}

/// Routes one request's provider events into its record and the broadcast
struct RequestContext {
    inner: Arc<Inner>,
    request_id: String,
    chat_id: String,
}

impl RequestContext {
    /// Run `f` against the request's entry, or not at all once it was
    /// cancelled or stopped. The entry stays locked while `f` broadcasts, so
    /// no event can land after a concurrent cancel's terminal status.
    fn with_active<R>(&self, f: impl FnOnce(&mut ActiveRequest) -> R) -> Option<R> {
        let mut active = self.inner.active.get_mut(&self.request_id)?;
        Some(f(&mut active))
    }

    fn broadcast(&self, kind: StreamEventKind) {
        self.inner.broadcast(&self.request_id, &self.chat_id, kind);
    }
}

impl EventSink for RequestContext {
    fn emit(&self, event: ProviderEvent) {
        let delivered = self.with_active(|active| {
            if let ProviderEvent::PartialResponse { text } = &event {
                active.record.accumulated_text.push_str(text);
            }
            self.broadcast(event.into());
        });
        if delivered.is_none() {
            tracing::trace!("Dropping event for inactive request {}", self.request_id);
        }
    }
}

impl LoopObserver for RequestContext {
    fn iteration_started(&self, _iteration: usize) {
        self.with_active(|active| active.record.accumulated_text.clear());
    }

    fn turns_added(&self, turns: &[ConversationTurn]) {
        self.with_active(|_| {
            self.broadcast(StreamEventKind::MessagesAdded {
                turns: turns.to_vec(),
            })
        });
    }
}

#[async_trait]
impl ToolExecutor for RequestContext {
    /// Broadcast the call and wait for `provide_tool_result`
    async fn execute(&self, call: &ToolCall, preceding_text: &str) -> ToolExecutionResult {
        let (tx, rx) = oneshot::channel();
        // Registered before broadcasting so an immediate answer finds it
        let registered = self.with_active(|_| {
            self.inner.pending_tools.insert(self.request_id.clone(), tx);
            self.broadcast(StreamEventKind::ToolCallRequest {
                call: call.clone(),
                preceding_text: preceding_text.to_string(),
            });
        });
        if registered.is_none() {
            return ToolExecutionResult::error("Tool call was cancelled");
        }

        let timeout = self.inner.config.tool_result_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => ToolExecutionResult::error("Tool call was cancelled"),
            Err(_) => {
                self.inner.pending_tools.remove(&self.request_id);
                tracing::warn!(
                    "Tool call {} ({}) for request {} timed out after {:?}",
                    call.id,
                    call.tool_id,
                    self.request_id,
                    timeout
                );
                ToolExecutionResult::error(format!(
                    "Tool execution timed out after {} seconds",
                    timeout.as_secs()
                ))
            }
        }
    }
}

/// Owner of all in-flight requests. Cloning is cheap.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(mut config: SupervisorConfig, factory: Arc<dyn AdapterFactory>) -> Self {
        if config.max_tool_depth == 0 {
            tracing::warn!("max_tool_depth of 0 would fail every request; using 1");
            config.max_tool_depth = 1;
        }
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (active_count, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                active: DashMap::new(),
                pending_tools: DashMap::new(),
                events,
                active_count,
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Start a request and return its id. The request runs in the background;
    /// follow it through [`subscribe`](Self::subscribe).
    pub fn start(&self, request: StartRequest) -> Result<String> {
        let request_id = match &request.request_id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::InvalidRequest("request id is empty".into()));
            }
            Some(id) => id.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if request.chat_id.trim().is_empty() {
            return Err(Error::InvalidRequest("chat id is empty".into()));
        }
        if request.history.is_empty() {
            return Err(Error::InvalidRequest("history is empty".into()));
        }
        if self.inner.active.contains_key(&request_id) {
            return Err(Error::DuplicateRequest(request_id));
        }

        let adapter = self.inner.factory.create(&request.provider)?;
        let chat_id = request.chat_id.clone();
        let record = RequestRecord {
            request_id: request_id.clone(),
            chat_id: chat_id.clone(),
            provider: request.provider.provider,
            model: request.model.clone(),
            status: RequestStatus::Pending,
            accumulated_text: String::new(),
            created_at: Utc::now(),
        };
        let chat_request = request.into_chat_request()?;
        let cancel = CancellationToken::new();

        match self.inner.active.entry(request_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::DuplicateRequest(request_id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(ActiveRequest {
                    record,
                    cancel: cancel.clone(),
                });
            }
        }
        self.inner.publish_count();

        tracing::info!(
            "Starting request {} (chat {}, {} {})",
            request_id,
            chat_id,
            adapter.provider(),
            chat_request.model
        );
        if let Some(mut active) = self.inner.active.get_mut(&request_id) {
            active.record.status = RequestStatus::Streaming;
        }
        self.inner.broadcast(
            &request_id,
            &chat_id,
            StreamEventKind::StatusChange {
                status: RequestStatus::Streaming,
            },
        );

        let context = RequestContext {
            inner: self.inner.clone(),
            request_id: request_id.clone(),
            chat_id,
        };
        let max_tool_depth = self.inner.config.max_tool_depth;
        tokio::spawn(async move {
            let tool_loop = ToolLoop {
                adapter: adapter.as_ref(),
                executor: &context,
                sink: &context,
                observer: &context,
                max_tool_depth,
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Request {} task stopped", context.request_id);
                }
                outcome = tool_loop.run(chat_request) => {
                    context.inner.finish(&context.request_id, &context.chat_id, outcome);
                }
            }
        });

        Ok(request_id)
    }

    /// Cancel a request and broadcast `StatusChange(Cancelled)`
    pub fn cancel(&self, request_id: &str) -> Result<()> {
        let active = self
            .inner
            .remove(request_id)
            .ok_or_else(|| Error::UnknownRequest(request_id.to_string()))?;
        tracing::info!("Request {} cancelled", request_id);
        self.inner.broadcast(
            request_id,
            &active.record.chat_id,
            StreamEventKind::StatusChange {
                status: RequestStatus::Cancelled,
            },
        );
        Ok(())
    }

    /// Stop a request silently and return the text of its current call
    pub fn stop_and_keep_partial(&self, request_id: &str) -> Result<String> {
        let active = self
            .inner
            .remove(request_id)
            .ok_or_else(|| Error::UnknownRequest(request_id.to_string()))?;
        tracing::debug!(
            "Request {} stopped, keeping {} chars",
            request_id,
            active.record.accumulated_text.len()
        );
        Ok(active.record.accumulated_text)
    }

    /// Cancel every active request; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.inner.active.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id).is_ok()).count()
    }

    /// Answer the tool call a request is waiting on. Fulfils at most once.
    pub fn provide_tool_result(&self, request_id: &str, result: ToolExecutionResult) -> Result<()> {
        let (_, sender) = self
            .inner
            .pending_tools
            .remove(request_id)
            .ok_or_else(|| Error::NoPendingToolCall(request_id.to_string()))?;
        sender
            .send(result)
            .map_err(|_| Error::NoPendingToolCall(request_id.to_string()))
    }

    pub fn record(&self, request_id: &str) -> Option<RequestRecord> {
        self.inner
            .active
            .get(request_id)
            .map(|active| active.record.clone())
    }

    /// Snapshots of all active requests, oldest first
    pub fn active_requests(&self) -> Vec<RequestRecord> {
        let mut records: Vec<RequestRecord> = self
            .inner
            .active
            .iter()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn is_active(&self, request_id: &str) -> bool {
        self.inner.active.contains_key(request_id)
    }

    /// Receiver for all future events. Late subscribers get no history.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.events.subscribe()
    }

    /// Event stream that skips over lag gaps instead of ending
    pub fn events(&self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let mut rx = self.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event subscriber lagged; {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    pub fn watch_active_count(&self) -> watch::Receiver<usize> {
        self.inner.active_count.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedAdapter, ScriptedFactory, Step};
    use chorus_ai::{StreamOutcome, ThinkingInfo};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn start_request(chat_id: &str) -> StartRequest {
        StartRequest::new(
            chat_id,
            ProviderConfig::new(Provider::OpenAI, "k"),
            "gpt-test",
            vec![ConversationTurn::user("hello")],
        )
    }

    fn supervisor(adapters: Vec<Arc<ScriptedAdapter>>) -> Supervisor {
        supervisor_with(SupervisorConfig::default(), adapters)
    }

    fn supervisor_with(
        config: SupervisorConfig,
        adapters: Vec<Arc<ScriptedAdapter>>,
    ) -> Supervisor {
        Supervisor::new(config, ScriptedFactory::with(adapters))
    }

    async fn next_event(rx: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    /// Events of one request up to and including its terminal status
    async fn until_terminal(
        rx: &mut broadcast::Receiver<StreamEvent>,
        request_id: &str,
    ) -> Vec<StreamEvent> {
        let mut events = vec![];
        loop {
            let event = next_event(rx).await;
            if event.request_id != request_id {
                continue;
            }
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                return events;
            }
        }
    }

    fn partial(text: &str) -> ProviderEvent {
        ProviderEvent::PartialResponse { text: text.into() }
    }

    fn tool_step(id: &str) -> Step {
        Step::Outcome(
            vec![partial("Checking")],
            StreamOutcome::ToolCallDetected {
                call: ToolCall::new(id, "get_date_time", serde_json::json!({}), Provider::OpenAI),
                preceding_text: "Checking".into(),
                thinking: ThinkingInfo::default(),
            },
        )
    }

    async fn wait_for_partial(rx: &mut broadcast::Receiver<StreamEvent>, text: &str) {
        loop {
            let expected = StreamEventKind::PartialResponse { text: text.into() };
            if next_event(rx).await.kind == expected {
                return;
            }
        }
    }

    /// Kinds broadcast for `request_id` until `window` elapses
    async fn collect_for(
        rx: &mut broadcast::Receiver<StreamEvent>,
        request_id: &str,
        window: Duration,
    ) -> Vec<StreamEventKind> {
        let deadline = tokio::time::Instant::now() + window;
        let mut kinds = vec![];
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            if event.request_id == request_id {
                kinds.push(event.kind);
            }
        }
        kinds
    }

    /// Emits "a", blocks its worker for 300ms, then emits "b"
    fn stalled_adapter() -> Arc<ScriptedAdapter> {
        Arc::new(ScriptedAdapter::new(vec![Step::Stall(
            vec![partial("a")],
            Duration::from_millis(300),
            vec![partial("b")],
        )]))
    }

    #[tokio::test]
    async fn test_completes_with_partial_events() {
        let adapter = ScriptedAdapter::new(vec![Step::text(&["Hel", "lo"])]);
        let sup = supervisor(vec![Arc::new(adapter)]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        let kinds: Vec<StreamEventKind> = until_terminal(&mut rx, &id)
            .await
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                StreamEventKind::StatusChange { status: RequestStatus::Streaming },
                StreamEventKind::PartialResponse { text: "Hel".into() },
                StreamEventKind::PartialResponse { text: "lo".into() },
                StreamEventKind::Complete {
                    text: "Hello".into(),
                    thinking: ThinkingInfo::default()
                },
                StreamEventKind::StatusChange { status: RequestStatus::Completed },
            ]
        );
        assert_eq!(sup.active_count(), 0);
        assert!(sup.record(&id).is_none());
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[tokio::test]
    async fn test_tool_handshake() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![tool_step("c1"), Step::text(&["Noon"])]));
        let sup = supervisor(vec![adapter.clone()]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        loop {
            let event = next_event(&mut rx).await;
            if let StreamEventKind::ToolCallRequest { call, preceding_text } = event.kind {
                assert_eq!(call.id, "c1");
                assert_eq!(preceding_text, "Checking");
                break;
            }
        }
        sup.provide_tool_result(&id, ToolExecutionResult::success("12:00")).unwrap();
        assert!(matches!(
            sup.provide_tool_result(&id, ToolExecutionResult::success("again")),
            Err(Error::NoPendingToolCall(_))
        ));

        let events = until_terminal(&mut rx, &id).await;
        let added = events.iter().find_map(|e| match &e.kind {
            StreamEventKind::MessagesAdded { turns } => Some(turns.clone()),
            _ => None,
        });
        let added = added.expect("MessagesAdded");
        assert_eq!(added.len(), 2);
        assert_eq!(added[1].text, "12:00");
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            StreamEventKind::Complete { text, .. } if text == "Noon"
        )));
        assert_eq!(adapter.requests()[1].turns.len(), 3);
    }

    #[tokio::test]
    async fn test_tool_timeout_becomes_error_result() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            tool_step("c1"),
            Step::text(&["Gave up"]),
        ]));
        let config = SupervisorConfig {
            tool_result_timeout: Duration::from_millis(50),
            ..SupervisorConfig::default()
        };
        let sup = supervisor_with(config, vec![adapter.clone()]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        let events = until_terminal(&mut rx, &id).await;
        assert!(matches!(
            events.last().map(|e| &e.kind),
            Some(StreamEventKind::StatusChange { status: RequestStatus::Completed })
        ));
        let second = &adapter.requests()[1];
        assert!(second.turns[2].text.starts_with("Error: Tool execution timed out"));
    }

    #[tokio::test]
    async fn test_cancel_releases_pending_tool_call() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![tool_step("c1")]));
        let sup = supervisor(vec![adapter]);
        let mut rx = sup.subscribe();
        let mut count = sup.watch_active_count();
        let id = sup.start(start_request("chat")).unwrap();
        assert_eq!(*count.borrow_and_update(), 1);

        loop {
            if matches!(next_event(&mut rx).await.kind, StreamEventKind::ToolCallRequest { .. }) {
                break;
            }
        }
        sup.cancel(&id).unwrap();

        let events = until_terminal(&mut rx, &id).await;
        assert_eq!(
            events.last().map(|e| e.kind.clone()),
            Some(StreamEventKind::StatusChange { status: RequestStatus::Cancelled })
        );
        assert_eq!(sup.active_count(), 0);
        assert_eq!(*count.borrow_and_update(), 0);
        assert!(matches!(
            sup.provide_tool_result(&id, ToolExecutionResult::success("late")),
            Err(Error::NoPendingToolCall(_))
        ));
        assert!(matches!(sup.cancel(&id), Err(Error::UnknownRequest(_))));
    }

    #[tokio::test]
    async fn test_cancel_drops_provider_call() {
        let dropped = Arc::new(AtomicBool::new(false));
        let adapter = Arc::new(ScriptedAdapter::new(vec![Step::Hang(vec![], dropped.clone())]));
        let sup = supervisor(vec![adapter.clone()]);
        let id = sup.start(start_request("chat")).unwrap();

        while adapter.calls() == 0 {
            tokio::task::yield_now().await;
        }
        sup.cancel(&id).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("provider call was not dropped");
    }

    #[tokio::test]
    async fn test_stop_and_keep_partial() {
        let dropped = Arc::new(AtomicBool::new(false));
        let adapter = Arc::new(ScriptedAdapter::new(vec![Step::Hang(
            vec![
                ProviderEvent::PartialResponse { text: "Hel".into() },
                ProviderEvent::PartialResponse { text: "lo".into() },
            ],
            dropped,
        )]));
        let sup = supervisor(vec![adapter]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        loop {
            let event = next_event(&mut rx).await;
            if event.kind == (StreamEventKind::PartialResponse { text: "lo".into() }) {
                break;
            }
        }
        assert_eq!(sup.stop_and_keep_partial(&id).unwrap(), "Hello");
        assert!(!sup.is_active(&id));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_order() {
        let adapters: Vec<Arc<ScriptedAdapter>> = (0..3)
            .map(|_| Arc::new(ScriptedAdapter::new(vec![Step::text(&["a", "b", "c", "d"])])))
            .collect();
        let sup = supervisor(adapters);
        let mut rx = sup.subscribe();
        let ids: Vec<String> = (0..3)
            .map(|i| sup.start(start_request(&format!("chat-{}", i))).unwrap())
            .collect();

        let mut texts = std::collections::HashMap::<String, String>::new();
        let mut finished = 0;
        while finished < ids.len() {
            let event = next_event(&mut rx).await;
            if event.is_terminal() {
                finished += 1;
            }
            if let StreamEventKind::PartialResponse { text } = event.kind {
                texts.entry(event.request_id).or_default().push_str(&text);
            }
        }
        for id in &ids {
            assert_eq!(texts[id], "abcd");
        }
        assert_eq!(sup.active_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_invalid_and_duplicate_requests() {
        let dropped = Arc::new(AtomicBool::new(false));
        let adapter = ScriptedAdapter::new(vec![Step::Hang(vec![], dropped)]);
        let sup = supervisor(vec![Arc::new(adapter)]);

        assert!(matches!(
            sup.start(start_request(" ")),
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(
            sup.start(start_request("chat").with_request_id("")),
            Err(Error::InvalidRequest(_))
        ));

        sup.start(start_request("chat").with_request_id("r1")).unwrap();
        assert!(matches!(
            sup.start(start_request("chat").with_request_id("r1")),
            Err(Error::DuplicateRequest(_))
        ));
        assert_eq!(sup.active_requests().len(), 1);
        assert_eq!(sup.record("r1").map(|r| r.status), Some(RequestStatus::Streaming));
        assert_eq!(sup.cancel_all(), 1);
        assert_eq!(sup.active_count(), 0);
    }

    #[tokio::test]
    async fn test_depth_exceeded_is_error_event() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            tool_step("c1"),
            tool_step("c2"),
            tool_step("c3"),
        ]));
        let config = SupervisorConfig {
            max_tool_depth: 2,
            ..SupervisorConfig::default()
        };
        let sup = supervisor_with(config, vec![adapter.clone()]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        let mut errors = vec![];
        loop {
            let event = next_event(&mut rx).await;
            match &event.kind {
                StreamEventKind::ToolCallRequest { .. } => {
                    sup.provide_tool_result(&id, ToolExecutionResult::success("ok")).unwrap();
                }
                StreamEventKind::Error { message } => errors.push(message.clone()),
                _ => {}
            }
            if event.is_terminal() {
                break;
            }
        }
        assert_eq!(errors, vec!["Maximum tool calling iterations (2) reached".to_string()]);
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_events_stream_and_attachments() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![Step::text(&["ok"])]));
        let sup = supervisor(vec![adapter.clone()]);
        let events = sup.events();
        futures::pin_mut!(events);

        let mut request = start_request("chat");
        request.attachments = vec![Attachment::from_bytes("image/png", b"img")];
        let id = sup.start(request).unwrap();

        let mut seen = vec![];
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("timed out")
        {
            let terminal = event.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
        assert!(seen.iter().all(|e| e.request_id == id));
        assert_eq!(adapter.requests()[0].turns[0].attachments.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_chunk_silences_request() {
        let sup = supervisor(vec![stalled_adapter()]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        wait_for_partial(&mut rx, "a").await;
        sup.cancel(&id).unwrap();

        let after = collect_for(&mut rx, &id, Duration::from_millis(600)).await;
        assert_eq!(
            after,
            vec![StreamEventKind::StatusChange { status: RequestStatus::Cancelled }]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_mid_chunk_broadcasts_nothing() {
        let sup = supervisor(vec![stalled_adapter()]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        wait_for_partial(&mut rx, "a").await;
        assert_eq!(sup.stop_and_keep_partial(&id).unwrap(), "a");

        let after = collect_for(&mut rx, &id, Duration::from_millis(600)).await;
        assert!(after.is_empty(), "unexpected events: {:?}", after);
    }

    #[tokio::test]
    async fn test_accumulated_text_resets_per_iteration() {
        let dropped = Arc::new(AtomicBool::new(false));
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            tool_step("c1"),
            Step::Hang(vec![partial("Noon")], dropped),
        ]));
        let sup = supervisor(vec![adapter]);
        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();

        loop {
            if let StreamEventKind::ToolCallRequest { .. } = next_event(&mut rx).await.kind {
                break;
            }
        }
        assert_eq!(sup.record(&id).unwrap().accumulated_text, "Checking");
        sup.provide_tool_result(&id, ToolExecutionResult::success("12:00")).unwrap();

        wait_for_partial(&mut rx, "Noon").await;
        assert_eq!(sup.record(&id).unwrap().accumulated_text, "Noon");
        assert_eq!(sup.stop_and_keep_partial(&id).unwrap(), "Noon");
    }

    #[tokio::test]
    async fn test_zero_depth_is_raised_to_one() {
        let config = SupervisorConfig {
            max_tool_depth: 0,
            ..SupervisorConfig::default()
        };
        let adapter = Arc::new(ScriptedAdapter::new(vec![Step::text(&["ok"])]));
        let sup = supervisor_with(config, vec![adapter.clone()]);
        assert_eq!(sup.config().max_tool_depth, 1);

        let mut rx = sup.subscribe();
        let id = sup.start(start_request("chat")).unwrap();
        let events = until_terminal(&mut rx, &id).await;
        assert_eq!(
            events.last().map(|e| e.kind.clone()),
            Some(StreamEventKind::StatusChange { status: RequestStatus::Completed })
        );
        assert_eq!(adapter.calls(), 1);
    }
}
