use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeishuError {
    #[error("verification token mismatch")]
    BadVerificationToken,

    #[error("tenant access token request failed: {0}")]
    TokenRequest(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("feishu api error {code}: {msg}")]
    Api { code: i64, msg: String },
}

pub type Result<T> = std::result::Result<T, FeishuError>;
