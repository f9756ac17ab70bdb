//! chorus-agent: Tool-calling loop and concurrent request supervisor
//!
//! This crate drives provider adapters from chorus-ai through bounded
//! tool-calling rounds and runs many such requests at once, broadcasting
//! their progress to any number of subscribers.

pub mod error;
pub mod events;
pub mod supervisor;
pub mod tool;
pub mod tool_loop;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use events::{RequestStatus, StreamEvent, StreamEventKind};
pub use supervisor::{RequestRecord, StartRequest, Supervisor, SupervisorConfig};
pub use tool::{BoxedTool, Tool, ToolExecutor, ToolRegistry, to_spec};
pub use tool_loop::{LoopObserver, LoopOutcome, NoopObserver, ToolLoop};
