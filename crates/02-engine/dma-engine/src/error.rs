use thiserror::Error;

use pcie_transport::TransportError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("operation table full ({capacity} live entries)")]
    TableFull { capacity: usize },

    #[error("malformed descriptor: {0}")]
    Malformed(&'static str),

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(&'static str),
}

impl EngineError {
    /// Resource exhaustion is back-pressure; the caller retries on a later cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TableFull { .. })
    }
}
