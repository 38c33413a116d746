//! Error handling helpers for the transport crate.
//!
//! The transport keeps its error surface small: configuration validation,
//! region allocation, and requests that address memory the root complex does
//! not own. Flow-control starvation is never an error here; it surfaces as a
//! `false` admission or a busy link.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Errors surfaced by the transport model.
pub enum TransportError {
    /// A size or capacity parameter is below the minimum or not a power of two.
    InvalidCapacity { requested: u64, minimum: u64 },
    /// The backing store for a memory region could not be allocated.
    AllocationFailed { size: usize },
    /// An access touched bytes outside of the addressed region.
    OutOfRange { addr: u64, len: u64 },
    /// The completer refused the request (injected fault window).
    Rejected { addr: u64, len: u64 },
    /// A request was offered while the link was not accepting traffic.
    LinkBusy,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidCapacity { requested, minimum } => {
                write!(
                    f,
                    "capacity {requested} must be a power of two of at least {minimum}"
                )
            }
            TransportError::AllocationFailed { size } => {
                write!(f, "failed to allocate memory region of {size} bytes")
            }
            TransportError::OutOfRange { addr, len } => {
                write!(f, "access of {len} bytes at {addr:#x} is outside the region")
            }
            TransportError::Rejected { addr, len } => {
                write!(f, "request of {len} bytes at {addr:#x} was rejected by the completer")
            }
            TransportError::LinkBusy => write!(f, "link is not accepting requests"),
        }
    }
}

impl std::error::Error for TransportError {}
