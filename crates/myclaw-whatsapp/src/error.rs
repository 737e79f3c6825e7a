use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhatsappError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("not connected")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, WhatsappError>;
