//! WhatsApp channel: a WebSocket client to a bridge process (§2 component 9,
//! §4.2, §6).

pub mod channel;
pub mod error;

pub use channel::WhatsappChannel;
pub use error::WhatsappError;
