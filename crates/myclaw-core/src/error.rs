use thiserror::Error;

#[derive(Debug, Error)]
pub enum MyclawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MyclawError {
    /// Short error code string, used when surfacing HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MyclawError::Config(_) => "CONFIG_ERROR",
            MyclawError::Channel { .. } => "CHANNEL_ERROR",
            MyclawError::Database(_) => "DATABASE_ERROR",
            MyclawError::Serialization(_) => "SERIALIZATION_ERROR",
            MyclawError::Io(_) => "IO_ERROR",
            MyclawError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            MyclawError::Timeout { .. } => "TIMEOUT",
            MyclawError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MyclawError>;
