//! Event counters exposed as a read-only register bank.
//!
//! Counter `k` lives at bank index `k`. Indices 0..32 count bus packets as
//! seen by the card, 32..48 describe the read channel and 48..64 the write
//! channel. Every counter is a saturating 64-bit accumulator updated with
//! relaxed atomics, so recording never blocks or fails.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::desc::Direction;

/// Number of counters in the bank.
pub const STATS_LEN: usize = 64;

const READ_BASE: usize = 32;
const WRITE_BASE: usize = 48;

/// Packet counters at bank indices 0..32.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlpCounter {
    RxMemRd = 0,
    RxMemWr = 1,
    RxIo = 2,
    RxCfg = 3,
    RxMsg = 4,
    RxCpl = 5,
    RxCplUr = 6,
    RxCplCa = 7,
    RxAtomic = 8,
    RxEp = 9,
    RxHdrDw = 10,
    RxReqDw = 11,
    RxPayloadDw = 12,
    RxCplDw = 13,
    TxMemRd = 16,
    TxMemWr = 17,
    TxIo = 18,
    TxCfg = 19,
    TxMsg = 20,
    TxCpl = 21,
    TxCplUr = 22,
    TxCplCa = 23,
    TxAtomic = 24,
    TxEp = 25,
    TxHdrDw = 26,
    TxReqDw = 27,
    TxPayloadDw = 28,
    TxCplDw = 29,
}

/// Per-channel counters; the read channel starts at 32, the write channel at 48.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DmaCounter {
    OpCount = 0,
    OpBytes = 1,
    OpLatency = 2,
    OpError = 3,
    ReqCount = 4,
    ReqLatency = 5,
    /// Smallest descriptor latency seen; all ones until the first sample.
    OpLatencyMin = 6,
    OpLatencyMax = 7,
    StallCredit = 8,
    StallTable = 9,
    StallBusy = 10,
    StaleCompletion = 11,
    BlockCycles = 12,
}

const DMA_COUNTERS: [DmaCounter; 13] = [
    DmaCounter::OpCount,
    DmaCounter::OpBytes,
    DmaCounter::OpLatency,
    DmaCounter::OpError,
    DmaCounter::ReqCount,
    DmaCounter::ReqLatency,
    DmaCounter::OpLatencyMin,
    DmaCounter::OpLatencyMax,
    DmaCounter::StallCredit,
    DmaCounter::StallTable,
    DmaCounter::StallBusy,
    DmaCounter::StaleCompletion,
    DmaCounter::BlockCycles,
];

const TLP_NAMES: [&str; 32] = [
    "pcie_rx_tlp_mem_rd",
    "pcie_rx_tlp_mem_wr",
    "pcie_rx_tlp_io",
    "pcie_rx_tlp_cfg",
    "pcie_rx_tlp_msg",
    "pcie_rx_tlp_cpl",
    "pcie_rx_tlp_cpl_ur",
    "pcie_rx_tlp_cpl_ca",
    "pcie_rx_tlp_atomic",
    "pcie_rx_tlp_ep",
    "pcie_rx_tlp_hdr_dw",
    "pcie_rx_tlp_req_dw",
    "pcie_rx_tlp_payload_dw",
    "pcie_rx_tlp_cpl_dw",
    "",
    "",
    "pcie_tx_tlp_mem_rd",
    "pcie_tx_tlp_mem_wr",
    "pcie_tx_tlp_io",
    "pcie_tx_tlp_cfg",
    "pcie_tx_tlp_msg",
    "pcie_tx_tlp_cpl",
    "pcie_tx_tlp_cpl_ur",
    "pcie_tx_tlp_cpl_ca",
    "pcie_tx_tlp_atomic",
    "pcie_tx_tlp_ep",
    "pcie_tx_tlp_hdr_dw",
    "pcie_tx_tlp_req_dw",
    "pcie_tx_tlp_payload_dw",
    "pcie_tx_tlp_cpl_dw",
    "",
    "",
];

const READ_NAMES: [&str; 13] = [
    "dma_rd_op_count",
    "dma_rd_op_bytes",
    "dma_rd_op_latency",
    "dma_rd_op_error",
    "dma_rd_req_count",
    "dma_rd_req_latency",
    "dma_rd_op_latency_min",
    "dma_rd_op_latency_max",
    "dma_rd_stall_credit",
    "dma_rd_stall_table",
    "dma_rd_stall_busy",
    "dma_rd_stale_cpl",
    "dma_rd_block_cycles",
];

const WRITE_NAMES: [&str; 13] = [
    "dma_wr_op_count",
    "dma_wr_op_bytes",
    "dma_wr_op_latency",
    "dma_wr_op_error",
    "dma_wr_req_count",
    "dma_wr_req_latency",
    "dma_wr_op_latency_min",
    "dma_wr_op_latency_max",
    "dma_wr_stall_credit",
    "dma_wr_stall_table",
    "dma_wr_stall_busy",
    "dma_wr_stale_cpl",
    "dma_wr_block_cycles",
];

impl DmaCounter {
    fn reset_value(self) -> u64 {
        match self {
            DmaCounter::OpLatencyMin => u64::MAX,
            _ => 0,
        }
    }
}

/// Value the counter at bank index `index` holds after a clear.
pub fn reset_value(index: usize) -> u64 {
    match Counter::dma_from_index(index) {
        Some(Counter::Dma(_, counter)) => counter.reset_value(),
        _ => 0,
    }
}

/// Identifies one counter in the bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Counter {
    Tlp(TlpCounter),
    Dma(Direction, DmaCounter),
}

impl Counter {
    pub fn read(counter: DmaCounter) -> Self {
        Counter::Dma(Direction::Read, counter)
    }

    pub fn write(counter: DmaCounter) -> Self {
        Counter::Dma(Direction::Write, counter)
    }

    /// Bank index of this counter.
    pub fn index(self) -> usize {
        match self {
            Counter::Tlp(c) => c as usize,
            Counter::Dma(Direction::Read, c) => READ_BASE + c as usize,
            Counter::Dma(Direction::Write, c) => WRITE_BASE + c as usize,
        }
    }

    /// Inverse of [`Counter::index`] for DMA counters; packet counters are
    /// addressed by index only.
    pub fn dma_from_index(index: usize) -> Option<Self> {
        let (direction, rel) = match index {
            READ_BASE..=47 => (Direction::Read, index - READ_BASE),
            WRITE_BASE..=63 => (Direction::Write, index - WRITE_BASE),
            _ => return None,
        };
        DMA_COUNTERS
            .get(rel)
            .map(|&counter| Counter::Dma(direction, counter))
    }

    pub fn name(self) -> &'static str {
        counter_name(self.index())
    }
}

/// Name of the counter at bank index `index`; empty for unused indices.
pub fn counter_name(index: usize) -> &'static str {
    match index {
        0..=31 => TLP_NAMES[index],
        READ_BASE..=47 => READ_NAMES.get(index - READ_BASE).copied().unwrap_or(""),
        WRITE_BASE..=63 => WRITE_NAMES.get(index - WRITE_BASE).copied().unwrap_or(""),
        _ => "",
    }
}

/// Shared counter bank.
#[derive(Debug)]
pub struct StatsCollector {
    counters: [AtomicU64; STATS_LEN],
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|i| AtomicU64::new(reset_value(i))),
        }
    }

    fn slot(&self, id: Counter) -> &AtomicU64 {
        &self.counters[id.index()]
    }

    pub fn record(&self, id: Counter) {
        self.record_with_value(id, 1);
    }

    pub fn record_with_value(&self, id: Counter, value: u64) {
        if value == 0 {
            return;
        }
        let _ = self
            .slot(id)
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_add(value))
            });
    }

    /// Keeps the smallest value seen, 0 included.
    pub fn record_min(&self, id: Counter, value: u64) {
        self.slot(id).fetch_min(value, Ordering::Relaxed);
    }

    pub fn record_max(&self, id: Counter, value: u64) {
        self.slot(id).fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self, id: Counter) -> u64 {
        self.slot(id).load(Ordering::Relaxed)
    }

    /// Raw bank read; out-of-range indices read as zero.
    pub fn read_index(&self, index: usize) -> u64 {
        self.counters
            .get(index)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn clear(&self, id: Counter) {
        self.slot(id).store(reset_value(id.index()), Ordering::Relaxed);
    }

    pub fn clear_all(&self) {
        for (i, counter) in self.counters.iter().enumerate() {
            counter.store(reset_value(i), Ordering::Relaxed);
        }
    }

    /// Non-destructive copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            values: self
                .counters
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Point-in-time copy of the counter bank.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub values: Vec<u64>,
}

impl StatsSnapshot {
    pub fn get(&self, id: Counter) -> u64 {
        self.values.get(id.index()).copied().unwrap_or(0)
    }

    /// Counter-wise `self - earlier`, for additive counters.
    pub fn delta(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| v.saturating_sub(earlier.values.get(i).copied().unwrap_or(0)))
            .collect();
        StatsSnapshot { values }
    }

    /// `(name, value)` for every named counter in bank order.
    pub fn named(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &v)| (counter_name(i), v))
            .filter(|(name, _)| !name.is_empty())
    }

    /// Like [`StatsSnapshot::named`], skipping counters still at their reset value.
    pub fn active(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|&(i, &v)| v != reset_value(i))
            .map(|(i, &v)| (counter_name(i), v))
            .filter(|(name, _)| !name.is_empty())
    }
}
