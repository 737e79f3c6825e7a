//! Shared channel contract and registry (§3 Channel, §4.2).
//!
//! Each concrete channel adapter (telegram, feishu, wecom, whatsapp, webui)
//! lives in its own crate and implements [`Channel`]; this crate only holds
//! the trait, the allowlist/status types, the outbound-length splitter, and
//! the [`ChannelManager`] that starts/stops the registered set.

pub mod channel;
pub mod error;
pub mod manager;
pub mod split;
pub mod types;

pub use channel::Channel;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use split::split_for_transport;
pub use types::{Allowlist, ChannelStatus};
