use thiserror::Error;

use dma_engine::EngineError;
use pcie_transport::TransportError;

pub type BenchResult<T> = Result<T, BenchError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BenchError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid bench configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("{what} did not finish within {cycles} cycles")]
    Timeout { what: &'static str, cycles: u64 },

    #[error("transfer failed with status {status:#010x}")]
    Transfer { status: u32 },

    #[error("data mismatch: {0}")]
    Mismatch(String),
}
