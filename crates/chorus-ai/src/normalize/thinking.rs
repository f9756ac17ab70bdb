//! Reasoning-phase tracking shared by every provider dialect

use std::time::Instant;

use crate::stream::{EventSink, ProviderEvent, ThinkingInfo, ThinkingStatus};

/// Started -> Partial* -> Complete, at most once per provider call.
#[derive(Debug, Default)]
pub(crate) struct ThinkingTracker {
    requested: bool,
    started_at: Option<Instant>,
    text: String,
    duration_ms: Option<u64>,
}

impl ThinkingTracker {
    pub(crate) fn new(requested: bool) -> Self {
        Self {
            requested,
            ..Self::default()
        }
    }

    pub(crate) fn delta(&mut self, delta: &str, sink: &dyn EventSink) {
        if delta.is_empty() {
            return;
        }
        if self.duration_ms.is_some() {
            // The phase never reopens, and the reported text stays the one
            // carried by ThinkingComplete
            tracing::debug!("Dropping {} bytes of reasoning after the phase closed", delta.len());
            return;
        }
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
            sink.emit(ProviderEvent::ThinkingStarted);
        }
        self.text.push_str(delta);
        sink.emit(ProviderEvent::ThinkingPartial {
            text: delta.to_string(),
        });
    }

    /// Close an open phase. Idempotent.
    pub(crate) fn close(&mut self, sink: &dyn EventSink) {
        let Some(started) = self.started_at else {
            return;
        };
        if self.duration_ms.is_some() {
            return;
        }
        let duration_ms = started.elapsed().as_millis() as u64;
        self.duration_ms = Some(duration_ms);
        sink.emit(ProviderEvent::ThinkingComplete {
            text: self.text.clone(),
            duration_ms,
        });
    }

    pub(crate) fn info(&self) -> ThinkingInfo {
        match self.duration_ms {
            Some(duration_ms) => ThinkingInfo {
                status: ThinkingStatus::Complete,
                text: self.text.clone(),
                duration_ms,
            },
            None if self.requested => ThinkingInfo {
                status: ThinkingStatus::Unavailable,
                ..ThinkingInfo::default()
            },
            None => ThinkingInfo::default(),
        }
    }
}
