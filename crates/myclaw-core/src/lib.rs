//! `myclaw-core` — shared config, error, and message types for the gateway.
//!
//! Every other crate in the workspace depends on this one for the
//! `InboundMessage`/`OutboundMessage` contract, the `MyclawConfig` loader,
//! and the common `Result`/error type.

pub mod config;
pub mod error;
pub mod types;

pub use config::MyclawConfig;
pub use error::{MyclawError, Result};
pub use types::{session_key, ContentBlock, InboundMessage, OutboundMessage};
