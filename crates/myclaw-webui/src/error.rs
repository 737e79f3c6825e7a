use thiserror::Error;

#[derive(Debug, Error)]
pub enum WebuiError {
    #[error("no websocket connection open for session {0}")]
    NoSession(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, WebuiError>;
