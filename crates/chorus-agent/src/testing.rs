//! Scripted provider adapters for loop and supervisor tests

use async_trait::async_trait;
use chorus_ai::{
    AdapterFactory, ChatRequest, EventSink, Provider, ProviderAdapter, ProviderConfig,
    ProviderEvent, StreamOutcome,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted provider call
pub(crate) enum Step {
    /// Emit events, then return the outcome
    Outcome(Vec<ProviderEvent>, StreamOutcome),
    /// Emit events, then never finish. The flag is set when the call is dropped.
    Hang(Vec<ProviderEvent>, Arc<AtomicBool>),
    /// Emit the first events, block the worker thread, then emit the rest and
    /// complete with their text, all inside one poll
    Stall(Vec<ProviderEvent>, Duration, Vec<ProviderEvent>),
}

impl Step {
    pub(crate) fn outcome(outcome: StreamOutcome) -> Self {
        Step::Outcome(vec![], outcome)
    }

    pub(crate) fn text(deltas: &[&str]) -> Self {
        let events = deltas
            .iter()
            .map(|d| ProviderEvent::PartialResponse { text: d.to_string() })
            .collect();
        Step::Outcome(
            events,
            StreamOutcome::TextComplete {
                text: deltas.concat(),
                thinking: Default::default(),
            },
        )
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedAdapter {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    async fn stream(&self, request: &ChatRequest, sink: &dyn EventSink) -> StreamOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        let step = self.steps.lock().pop_front();

        match step {
            Some(Step::Outcome(events, outcome)) => {
                for event in events {
                    sink.emit(event);
                    tokio::task::yield_now().await;
                }
                outcome
            }
            Some(Step::Hang(events, dropped)) => {
                let _guard = DropFlag(dropped);
                for event in events {
                    sink.emit(event);
                }
                std::future::pending::<()>().await;
                StreamOutcome::error("unreachable")
            }
            Some(Step::Stall(before, pause, after)) => {
                let text = before
                    .iter()
                    .chain(&after)
                    .filter_map(|e| match e {
                        ProviderEvent::PartialResponse { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<String>();
                for event in before {
                    sink.emit(event);
                }
                // Blocks like parsing one large network chunk would
                std::thread::sleep(pause);
                for event in after {
                    sink.emit(event);
                }
                StreamOutcome::TextComplete {
                    text,
                    thinking: Default::default(),
                }
            }
            None => StreamOutcome::error("script exhausted"),
        }
    }
}

/// Hands out one scripted adapter per created request, in order
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    adapters: Mutex<VecDeque<Arc<ScriptedAdapter>>>,
}

impl ScriptedFactory {
    pub(crate) fn with(adapters: Vec<Arc<ScriptedAdapter>>) -> Arc<Self> {
        Arc::new(Self {
            adapters: Mutex::new(adapters.into()),
        })
    }
}

impl AdapterFactory for ScriptedFactory {
    fn create(&self, config: &ProviderConfig) -> chorus_ai::Result<Arc<dyn ProviderAdapter>> {
        match self.adapters.lock().pop_front() {
            Some(adapter) => Ok(adapter as Arc<dyn ProviderAdapter>),
            None => Err(chorus_ai::Error::UnsupportedProvider(config.provider.name().to_string())),
        }
    }
}
