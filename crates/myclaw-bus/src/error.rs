use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is shutting down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BusError>;
