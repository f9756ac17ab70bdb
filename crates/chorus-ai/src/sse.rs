//! Provider-agnostic Server-Sent-Events line parser
//!
//! Reads a line-oriented body and hands each JSON `data:` payload to an
//! [`SseHandler`]. One malformed chunk never aborts an otherwise good stream:
//! it is reported through [`SseHandler::on_parse_error`] and skipped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// What the handler wants the reader to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Terminal signal seen; stop reading successfully
    Stop,
    /// Terminal error seen; stop reading
    Error,
}

/// Consumer of parsed SSE records
pub trait SseHandler {
    /// A JSON payload, tagged with the most recent `event:` line if any
    fn on_event(&mut self, event_type: Option<&str>, data: serde_json::Value) -> Action;

    /// A `data:` payload that was not valid JSON
    fn on_parse_error(&mut self, line: &str, error: &serde_json::Error) {
        let _ = (line, error);
    }

    /// End of stream reached without a handler-issued stop
    fn on_stream_end(&mut self) {}
}

/// Parser options
#[derive(Debug, Clone)]
pub struct SseOptions {
    /// Skip `:` comment lines silently (relay keepalives)
    pub skip_keepalives: bool,
    /// Payload that marks a successful end of stream
    pub done_marker: String,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            skip_keepalives: false,
            done_marker: "[DONE]".to_string(),
        }
    }
}

impl SseOptions {
    pub fn skipping_keepalives() -> Self {
        Self {
            skip_keepalives: true,
            ..Self::default()
        }
    }
}

/// How a read ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEnd {
    /// End of body or done-marker; `on_stream_end` was called
    Completed,
    /// Handler returned [`Action::Stop`]
    Stopped,
    /// Handler returned [`Action::Error`]
    Errored,
    /// Reading the body failed
    Failed(String),
}

/// Read `reader` to completion, dispatching records to `handler`.
pub async fn read_sse<R, H>(reader: R, options: &SseOptions, handler: &mut H) -> SseEnd
where
    R: AsyncBufRead + Unpin,
    H: SseHandler + ?Sized,
{
    let mut lines = reader.lines();
    let mut event_type: Option<String> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("SSE read failed: {}", e);
                return SseEnd::Failed(e.to_string());
            }
        };
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            event_type = None;
            continue;
        }

        if line.starts_with(':') {
            if !options.skip_keepalives {
                tracing::trace!("Ignoring SSE comment line: {}", line);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim().to_string());
            continue;
        }

        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();

        if payload == options.done_marker {
            handler.on_stream_end();
            return SseEnd::Completed;
        }
        if payload.is_empty() || payload == "{}" {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(data) => match handler.on_event(event_type.as_deref(), data) {
                Action::Continue => {}
                Action::Stop => return SseEnd::Stopped,
                Action::Error => return SseEnd::Errored,
            },
            Err(e) => {
                tracing::warn!("Skipping malformed SSE chunk: {} ({})", payload, e);
                handler.on_parse_error(line, &e);
            }
        }
    }

    handler.on_stream_end();
    SseEnd::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[derive(Default)]
    struct Recorder {
        events: Vec<(Option<String>, Value)>,
        parse_errors: Vec<String>,
        ended: bool,
        stop_on: Option<&'static str>,
    }

    impl SseHandler for Recorder {
        fn on_event(&mut self, event_type: Option<&str>, data: Value) -> Action {
            let stop = self
                .stop_on
                .is_some_and(|s| data.get("kind").and_then(|k| k.as_str()) == Some(s));
            self.events.push((event_type.map(str::to_string), data));
            if stop { Action::Stop } else { Action::Continue }
        }

        fn on_parse_error(&mut self, line: &str, _error: &serde_json::Error) {
            self.parse_errors.push(line.to_string());
        }

        fn on_stream_end(&mut self) {
            self.ended = true;
        }
    }

    async fn run(body: &str, options: SseOptions, recorder: &mut Recorder) -> SseEnd {
        read_sse(body.as_bytes(), &options, recorder).await
    }

    #[tokio::test]
    async fn test_done_marker_ends_without_event() {
        let mut r = Recorder::default();
        let body = "data: {\"a\":1}\n\ndata: [DONE]\n\ndata: {\"a\":2}\n";
        let end = run(body, SseOptions::default(), &mut r).await;
        assert_eq!(end, SseEnd::Completed);
        assert_eq!(r.events.len(), 1);
        assert!(r.ended);
    }

    #[tokio::test]
    async fn test_blank_and_empty_object_payloads_skipped() {
        let mut r = Recorder::default();
        run("data:\n\ndata: {}\n\ndata: {\"a\":1}\n", SseOptions::default(), &mut r).await;
        assert_eq!(r.events.len(), 1);
        assert!(r.parse_errors.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_chunk_is_skipped() {
        let mut r = Recorder::default();
        let body = "data: {\"t\":\"Hel\"}\n\ndata: {not json\n\ndata: {\"t\":\"lo\"}\n\n";
        let end = run(body, SseOptions::default(), &mut r).await;
        assert_eq!(end, SseEnd::Completed);
        assert_eq!(r.events.len(), 2);
        assert_eq!(r.parse_errors, vec!["data: {not json".to_string()]);
        assert!(r.ended);
    }

    #[tokio::test]
    async fn test_event_tag_applies_until_blank_line() {
        let mut r = Recorder::default();
        let body = "event: message_start\ndata: {\"a\":1}\n\ndata: {\"a\":2}\n";
        run(body, SseOptions::default(), &mut r).await;
        assert_eq!(r.events[0].0.as_deref(), Some("message_start"));
        assert_eq!(r.events[1].0, None);
    }

    #[tokio::test]
    async fn test_keepalive_comments_skipped() {
        let mut r = Recorder::default();
        let body = ": OPENROUTER PROCESSING\n\ndata: {\"a\":1}\r\n\r\n: ping\n";
        let end = run(body, SseOptions::skipping_keepalives(), &mut r).await;
        assert_eq!(end, SseEnd::Completed);
        assert_eq!(r.events.len(), 1);
        assert!(r.parse_errors.is_empty());
    }

    #[tokio::test]
    async fn test_stop_terminates_without_stream_end() {
        let mut r = Recorder {
            stop_on: Some("last"),
            ..Default::default()
        };
        let body = concat!(
            "data: {\"kind\":\"first\"}\n\n",
            "data: {\"kind\":\"last\"}\n\n",
            "data: {\"kind\":\"after\"}\n",
        );
        let end = run(body, SseOptions::default(), &mut r).await;
        assert_eq!(end, SseEnd::Stopped);
        assert_eq!(r.events.len(), 2);
        assert!(!r.ended);
    }

    #[tokio::test]
    async fn test_non_data_lines_ignored() {
        let mut r = Recorder::default();
        let body = "id: 7\nretry: 1000\ndata: {\"a\":1}\n";
        run(body, SseOptions::default(), &mut r).await;
        assert_eq!(r.events.len(), 1);
    }
}
