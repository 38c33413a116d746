//! Tag-indexed, credit-flow-controlled DMA transfer engine.
//!
//! A [`Descriptor`] admitted through [`DmaEngine::submit`] gets a slot in the
//! [`OpTable`], is cut into boundary-respecting requests by the
//! [`Segmenter`], and is issued against a [`pcie_transport::Transport`] as
//! flow-control credits allow. Read completions are matched back to their
//! slot by the [`Correlator`]; every retirement produces a [`DescStatus`]
//! and is accounted in the [`StatsCollector`] bank.

pub mod config;
pub mod correlator;
pub mod desc;
mod engine;
mod error;
mod handle;
pub mod op_table;
pub mod segment;
pub mod stats;
mod tag_pool;

pub use config::EngineConfig;
pub use correlator::{Correlation, Correlator};
pub use desc::{decode_status, DescStatus, Descriptor, Direction, ErrorKind};
pub use engine::{DmaEngine, Stall};
pub use error::{EngineError, EngineResult};
pub use handle::EngineHandle;
pub use op_table::{OpEntry, OpState, OpTable, OpTag, RetiredOp};
pub use segment::{Chunk, Segmenter};
pub use stats::{Counter, DmaCounter, StatsCollector, StatsSnapshot, TlpCounter};
