pub mod channel;
pub mod error;

pub use channel::TelegramChannel;
pub use error::TelegramError;
