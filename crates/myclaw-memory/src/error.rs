use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("schema migration error: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("llm extraction failed: {0}")]
    Extraction(String),

    #[error("llm compression failed: {0}")]
    Compression(String),

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("rerank request failed: {0}")]
    Rerank(String),

    #[error("query expansion request failed: {0}")]
    Expansion(String),

    #[error("invalid vector encoding: {0}")]
    Vector(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MemoryError>;
