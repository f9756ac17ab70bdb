//! chorus-ai: streaming chat completions across providers
//!
//! Every provider (OpenAI, Anthropic, Google Gemini, Poe, Cohere and
//! OpenAI-compatible aggregators) is reduced to one event model: text and
//! reasoning deltas delivered to an [`EventSink`] while the stream is read,
//! and a single [`StreamOutcome`] per call.

pub mod error;
pub mod http;
pub mod normalize;
pub mod providers;
pub mod sse;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use http::{HttpClient, ReqwestClient};
pub use providers::{AdapterFactory, HttpAdapterFactory, ProviderAdapter, create_adapter};
pub use stream::{EventSink, NullSink, ProviderEvent, StreamOutcome, ThinkingInfo, ThinkingStatus};
pub use types::*;
