use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,

    #[error("invalid chat id: {0}")]
    InvalidChatId(String),
}

pub type Result<T> = std::result::Result<T, TelegramError>;
