//! The narrow model-runtime contract the gateway orchestrator drives:
//! one request, one response, no tool dispatch (§6, §9).

pub mod anthropic;
pub mod error;
pub mod runtime;

pub use anthropic::AnthropicRuntime;
pub use error::{Result, RuntimeError};
pub use runtime::{ModelRuntime, RunRequest, RunResult};
