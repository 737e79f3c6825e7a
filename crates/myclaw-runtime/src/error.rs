use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
