use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("duplicate job name: {0}")]
    Duplicate(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
