//! The message bus that decouples channel adapters from the gateway
//! orchestrator: one bounded inbound queue, one bounded outbound queue, and
//! an outbound subscriber table keyed by channel name.

pub mod bus;
pub mod error;

pub use bus::{MessageBus, OutboundSubscriber};
pub use error::{BusError, Result};
