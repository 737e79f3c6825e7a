use thiserror::Error;

/// Fatal construction-time errors (§4.9 "each step fatal"). Runtime errors
/// from long-running loops are logged in place rather than surfaced here.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("duplicate skill name: {0}")]
    DuplicateSkill(String),

    #[error(transparent)]
    Memory(#[from] myclaw_memory::MemoryError),

    #[error(transparent)]
    Scheduler(#[from] myclaw_scheduler::SchedulerError),

    #[error(transparent)]
    Channel(#[from] myclaw_channels::ChannelError),

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
