//! Feishu webhook channel: event-API callback server plus tenant-token-
//! authenticated outbound send (§2 component 9, §6).

pub mod channel;
pub mod error;
pub mod server;
pub mod token;

pub use channel::FeishuChannel;
pub use error::FeishuError;
