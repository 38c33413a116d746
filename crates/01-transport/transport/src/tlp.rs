//! Request/completion records exchanged with the transport.
//!
//! These are not wire-accurate TLPs: framing, byte enables and sequence
//! numbers are the transport's business. A request carries an opaque
//! requester tag that the completer echoes verbatim, together with the byte
//! offset of the request inside its parent transfer, so the requester can
//! route every completion without keeping a reverse map.

use crate::credit::{CreditClass, CreditCounts};
use crate::TransportResult;

/// Non-posted memory read request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    /// Opaque value echoed in every completion for this request.
    pub requester_tag: u64,
    /// Host address of the first requested byte.
    pub addr: u64,
    /// Number of bytes requested.
    pub len: u32,
    /// Offset of `addr` relative to the start of the parent transfer.
    pub byte_offset: u32,
    /// Requester cycle at which the request was issued.
    pub issued_at: u64,
}

/// Posted memory write request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRequest {
    /// Host address of the first written byte.
    pub addr: u64,
    /// Payload; never empty.
    pub data: Vec<u8>,
}

/// Completion status reported by the completer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CplStatus {
    /// Successful completion carrying data.
    Success,
    /// The completer does not decode the address.
    UnsupportedRequest,
    /// The completer failed while servicing the request.
    CompleterAbort,
    /// Data arrived with the poisoned bit set.
    Poisoned,
}

impl CplStatus {
    pub fn is_success(self) -> bool {
        matches!(self, CplStatus::Success)
    }

    /// Whether the error is reported on the correctable (advisory) monitor.
    ///
    /// Unsupported requests on reads are advisory non-fatal; aborts and
    /// poisoned data are reported as uncorrectable.
    pub fn is_correctable(self) -> bool {
        matches!(self, CplStatus::UnsupportedRequest)
    }
}

/// Completion for (part of) a read request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Requester tag copied from the originating [`ReadRequest`].
    pub requester_tag: u64,
    /// Offset of the first byte of this completion within the parent transfer.
    pub byte_offset: u32,
    /// Bytes accounted for by this completion.
    pub byte_count: u32,
    /// Payload; `byte_count` bytes on success, empty otherwise.
    pub data: Vec<u8>,
    pub status: CplStatus,
    /// Set on the final completion of the originating request.
    pub last: bool,
    /// Copied from [`ReadRequest::issued_at`].
    pub issued_at: u64,
}

/// Events surfaced by a transport to the requester.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Newly advertised flow-control capacity.
    Credits {
        class: CreditClass,
        counts: CreditCounts,
    },
    /// A completion for an outstanding read request.
    Completion(Completion),
}

/// Requester-side view of a PCIe link.
///
/// Implementations never block: a busy link reports `false` from
/// [`Transport::can_accept`], and events are drained by polling.
pub trait Transport {
    /// Advances the transport by one clock cycle.
    fn tick(&mut self);
    /// Whether a request offered this cycle would be accepted.
    fn can_accept(&self) -> bool;
    /// Offers a non-posted read request. Flow-control credits must already be debited.
    fn send_read(&mut self, req: ReadRequest) -> TransportResult<()>;
    /// Offers a posted write request. Flow-control credits must already be debited.
    fn send_write(&mut self, req: WriteRequest) -> TransportResult<()>;
    /// Pops the next pending event, if any.
    fn poll_event(&mut self) -> Option<LinkEvent>;
}
