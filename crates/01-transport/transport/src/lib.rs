//! Link-level primitives shared by the DMA engine and its test benches.
//!
//! * [`CreditPool`] – lock-free posted/non-posted flow-control accounting.
//! * [`MemRegion`] – zeroed memory window mapped at a bus address.
//! * [`Transport`] – requester-side view of a link, with [`ReadRequest`],
//!   [`WriteRequest`] and [`Completion`] records.
//! * [`PcieLink`] – reference root complex with host memory, pause
//!   generator, reordering and fault injection.
//! * [`TransportError`] – lightweight error surface for link failures.

mod credit;
mod error;
mod link;
mod memory;
mod tlp;

pub use credit::{data_credits_for, CreditClass, CreditCounts, CreditPool, DATA_CREDIT_BYTES};
pub use error::{TransportError, TransportResult};
pub use link::{LinkConfig, LinkMetrics, PauseGenerator, PcieLink};
pub use memory::MemRegion;
pub use tlp::{Completion, CplStatus, LinkEvent, ReadRequest, Transport, WriteRequest};
