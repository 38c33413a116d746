//! Descriptors and the status words reported when they retire.

use pcie_transport::{CplStatus, TransportError};
use serde::{Deserialize, Serialize};

/// Largest payload carried by an immediate write.
pub const IMMEDIATE_MAX_LEN: u32 = 4;

/// Transfer direction, named from the host's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Host memory to card RAM.
    Read,
    /// Card RAM (or an immediate value) to host memory.
    Write,
}

/// One DMA transfer request. Immutable once submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub direction: Direction,
    /// Host-side bus address.
    pub pcie_addr: u64,
    /// Card RAM address; ignored for immediate writes.
    pub ram_addr: u64,
    pub len: u32,
    /// Caller-chosen tag echoed in the status word.
    pub tag: u16,
    /// Little-endian value written instead of RAM contents.
    pub immediate: Option<u32>,
}

impl Descriptor {
    pub fn read(pcie_addr: u64, ram_addr: u64, len: u32, tag: u16) -> Self {
        Self {
            direction: Direction::Read,
            pcie_addr,
            ram_addr,
            len,
            tag,
            immediate: None,
        }
    }

    pub fn write(pcie_addr: u64, ram_addr: u64, len: u32, tag: u16) -> Self {
        Self {
            direction: Direction::Write,
            pcie_addr,
            ram_addr,
            len,
            tag,
            immediate: None,
        }
    }

    /// Writes the low `len` bytes of `value` to `pcie_addr`.
    pub fn immediate(pcie_addr: u64, value: u32, len: u32, tag: u16) -> Self {
        Self {
            direction: Direction::Write,
            pcie_addr,
            ram_addr: 0,
            len,
            tag,
            immediate: Some(value),
        }
    }
}

/// Why a descriptor retired with the error bit set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedRequest,
    CompleterAbort,
    Poisoned,
    /// The transport refused a request outright.
    Rejected,
    /// Completions exceeded the outstanding byte count.
    Overrun,
    Malformed,
}

impl ErrorKind {
    /// Four-bit code placed in status bits 8..11.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::UnsupportedRequest => 1,
            ErrorKind::CompleterAbort => 2,
            ErrorKind::Poisoned => 3,
            ErrorKind::Rejected => 4,
            ErrorKind::Overrun => 5,
            ErrorKind::Malformed => 6,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => ErrorKind::UnsupportedRequest,
            2 => ErrorKind::CompleterAbort,
            3 => ErrorKind::Poisoned,
            4 => ErrorKind::Rejected,
            5 => ErrorKind::Overrun,
            6 => ErrorKind::Malformed,
            _ => return None,
        })
    }

    pub fn from_completion(status: CplStatus) -> Option<Self> {
        match status {
            CplStatus::Success => None,
            CplStatus::UnsupportedRequest => Some(ErrorKind::UnsupportedRequest),
            CplStatus::CompleterAbort => Some(ErrorKind::CompleterAbort),
            CplStatus::Poisoned => Some(ErrorKind::Poisoned),
        }
    }

    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::OutOfRange { .. } => ErrorKind::UnsupportedRequest,
            _ => ErrorKind::Rejected,
        }
    }

    /// Errors raised on the correctable (advisory) monitor; all others are uncorrectable.
    pub fn is_correctable(self) -> bool {
        matches!(self, ErrorKind::UnsupportedRequest)
    }
}

pub const STATUS_DONE: u32 = 1 << 31;
pub const STATUS_ERROR: u32 = 1 << 30;
const STATUS_CODE_SHIFT: u32 = 8;
const STATUS_CODE_MASK: u32 = 0xF << STATUS_CODE_SHIFT;

/// Outcome of a retired descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescStatus {
    pub direction: Direction,
    pub tag: u16,
    pub len: u32,
    pub error: Option<ErrorKind>,
    /// Engine cycles from admission to retirement.
    pub latency: u64,
}

impl DescStatus {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Status register encoding: done bit, error bit and code, low tag byte.
    pub fn to_register(&self) -> u32 {
        let mut word = STATUS_DONE | u32::from(self.tag & 0xFF);
        if let Some(kind) = self.error {
            word |= STATUS_ERROR | (kind.code() << STATUS_CODE_SHIFT);
        }
        word
    }
}

/// Splits a status register word into (done, error, tag byte).
pub fn decode_status(word: u32) -> (bool, Option<ErrorKind>, u8) {
    let error = if word & STATUS_ERROR != 0 {
        ErrorKind::from_code((word & STATUS_CODE_MASK) >> STATUS_CODE_SHIFT)
            .or(Some(ErrorKind::Rejected))
    } else {
        None
    };
    (word & STATUS_DONE != 0, error, word as u8)
}
