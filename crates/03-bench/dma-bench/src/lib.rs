//! Benchmark card built around the DMA engine.
//!
//! [`DmaBenchDevice`] decodes the card's register map on top of a
//! [`dma_engine::DmaEngine`] and a [`pcie_transport::Transport`]; the
//! [`BenchDriver`] programs it the way the host driver does: single
//! transfers, strided block runs, and throughput sweeps.

pub mod block;
pub mod checks;
mod device;
mod driver;
mod error;
pub mod regs;
pub mod sequencer;

pub use block::{BlockConfig, BlockRunner, RunSummary, RUNNER_TAG};
pub use device::{DmaBenchDevice, ErrorMonitors};
pub use driver::{
    next_tag, sweep_points, BenchDriver, BenchReport, DriverConfig, BENCH_WINDOW_MASK,
    CLOCK_PERIOD_NS, SELF_TEST_LEN, SWEEP_BLOCK_COUNT, SWEEP_MAX_SIZE,
};
pub use error::{BenchError, BenchResult};
pub use sequencer::{BlockSequencer, SequencerConfig};
