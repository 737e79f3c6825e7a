use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to start channel: {0}")]
    StartFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("no reply route cached for chat {0}")]
    NoReplyRoute(String),

    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("configuration error: {0}")]
    ConfigError(String),
}
