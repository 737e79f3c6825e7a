use thiserror::Error;

#[derive(Debug, Error)]
pub enum WecomError {
    #[error("missing query parameter: {0}")]
    MissingParam(&'static str),

    #[error("signature verification failed")]
    BadSignature,

    #[error("decrypt failed")]
    DecryptFailed,

    #[error("receive id mismatch")]
    ReceiveIdMismatch,

    #[error("invalid encodingAESKey")]
    BadAesKey,

    #[error("body too large: {0} bytes")]
    BodyTooLarge(usize),

    #[error("no reply route for chat {0}")]
    NoReplyRoute(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image fetch rejected: {0}")]
    MediaFetch(String),

    #[error("unsupported message type: {0}")]
    Unsupported(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WecomError>;
