//! Host-side driver for the benchmark card.
//!
//! Everything here goes through 32-bit register accesses, the way a kernel
//! driver talks to the card. Waiting is done by ticking the device between
//! status polls, bounded by cycle budgets from [`DriverConfig`].

use std::fmt;

use dma_engine::{Counter, DmaCounter, Direction};
use pcie_transport::{PcieLink, Transport};
use serde::{Deserialize, Serialize};

use crate::device::DmaBenchDevice;
use crate::regs;
use crate::sequencer::SequencerConfig;
use crate::{BenchError, BenchResult};

/// Card clock period used to turn cycle counts into nanoseconds.
pub const CLOCK_PERIOD_NS: u64 = 4;
/// Offset mask used by block benchmarks on both sides (16 KiB windows).
pub const BENCH_WINDOW_MASK: u64 = 0x3FFF;
/// Largest block size visited by [`sweep_points`] in the stock probe sweep.
pub const SWEEP_MAX_SIZE: u64 = 8192;
/// Strides are swept up to at least this many bytes.
pub const SWEEP_MIN_STRIDE_SPAN: u64 = 256;
/// Blocks per benchmark point in the stock probe sweep.
pub const SWEEP_BLOCK_COUNT: u64 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Bus address of the host buffer used by the self-test and benchmarks.
    pub host_region: u64,
    /// Cycle budget for a single descriptor.
    pub op_timeout: u64,
    /// Cycle budget for a whole block run.
    pub block_timeout: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            host_region: 0,
            op_timeout: 100_000,
            block_timeout: 200_000_000,
        }
    }
}

/// Next host tag derived from the channel's last status.
pub fn next_tag(status: u32) -> u32 {
    (status & 0x7F) + 1
}

/// (size, stride) pairs of a probe sweep: sizes double from 1 to `max_size`,
/// strides double from the size up to `max(size, 256)`.
pub fn sweep_points(max_size: u64) -> Vec<(u64, u64)> {
    let mut points = Vec::new();
    let mut size = 1;
    while size <= max_size {
        let mut stride = size;
        while stride <= size.max(SWEEP_MIN_STRIDE_SPAN) {
            points.push((size, stride));
            stride *= 2;
        }
        size *= 2;
    }
    points
}

/// One benchmark point, printable in the driver log format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchReport {
    pub direction: Direction,
    pub blocks: u64,
    pub size: u64,
    pub stride: u64,
    pub cycles: u64,
    pub ops: u64,
    pub op_latency: u64,
    pub requests: u64,
    pub request_latency: u64,
}

impl BenchReport {
    pub fn elapsed_ns(&self) -> u64 {
        self.cycles * CLOCK_PERIOD_NS
    }

    pub fn ns_per_op(&self) -> u64 {
        (self.op_latency * CLOCK_PERIOD_NS)
            .checked_div(self.ops)
            .unwrap_or(0)
    }

    pub fn ns_per_request(&self) -> u64 {
        (self.request_latency * CLOCK_PERIOD_NS)
            .checked_div(self.requests)
            .unwrap_or(0)
    }

    /// Throughput in megabits per second.
    pub fn mbps(&self) -> u64 {
        (self.size * self.blocks * 8 * 1000)
            .checked_div(self.elapsed_ns())
            .unwrap_or(0)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.direction {
            Direction::Read => "read",
            Direction::Write => "wrote",
        };
        write!(
            f,
            "{verb} {} blocks of {} bytes (stride {}) in {} ns ({} ns/op, {} req, {} ns/req): {} Mbps",
            self.blocks,
            self.size,
            self.stride,
            self.elapsed_ns(),
            self.ns_per_op(),
            self.requests,
            self.ns_per_request(),
            self.mbps()
        )
    }
}

pub struct BenchDriver<T> {
    device: DmaBenchDevice<T>,
    config: DriverConfig,
}

impl<T: Transport> BenchDriver<T> {
    pub fn new(device: DmaBenchDevice<T>, config: DriverConfig) -> Self {
        Self { device, config }
    }

    pub fn device(&self) -> &DmaBenchDevice<T> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut DmaBenchDevice<T> {
        &mut self.device
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn into_device(self) -> DmaBenchDevice<T> {
        self.device
    }

    pub fn enable(&mut self) -> BenchResult<()> {
        tracing::debug!("DMA enable was {:#010x}", self.device.read_reg(regs::CTRL_ENABLE));
        self.device.write_reg(regs::CTRL_ENABLE, 1)?;
        tracing::info!("DMA enable now {:#010x}", self.device.read_reg(regs::CTRL_ENABLE));
        Ok(())
    }

    pub fn read_stat(&self, index: usize) -> u64 {
        let lo = self.device.read_reg(regs::stat_counter(index));
        let hi = self.device.read_reg(regs::stat_counter(index) + 4);
        u64::from(lo) | (u64::from(hi) << 32)
    }

    fn write_u64(&mut self, offset: u32, value: u64) -> BenchResult<()> {
        self.device.write_reg(offset, value as u32)?;
        self.device.write_reg(offset + 4, (value >> 32) as u32)
    }

    fn read_u64(&self, offset: u32) -> u64 {
        u64::from(self.device.read_reg(offset))
            | (u64::from(self.device.read_reg(offset + 4)) << 32)
    }

    /// Ticks until `done(register value)` holds.
    fn wait_reg(
        &mut self,
        offset: u32,
        what: &'static str,
        timeout: u64,
        done: impl Fn(u32) -> bool,
    ) -> BenchResult<u32> {
        for _ in 0..timeout {
            let value = self.device.read_reg(offset);
            if done(value) {
                return Ok(value);
            }
            self.device.tick();
        }
        let value = self.device.read_reg(offset);
        if done(value) {
            return Ok(value);
        }
        tracing::warn!("{what}: timed out after {timeout} cycles (register {value:#010x})");
        Err(BenchError::Timeout {
            what,
            cycles: timeout,
        })
    }

    fn single(
        &mut self,
        base: u32,
        what: &'static str,
        dma_addr: u64,
        ram_word: u64,
        len: u32,
        flags: u32,
    ) -> BenchResult<u32> {
        // dummy read
        let _ = self.device.read_reg(base + regs::DESC_STATUS);
        let tag = next_tag(self.device.read_reg(base + regs::DESC_STATUS));
        self.write_u64(base + regs::DESC_PCIE_ADDR_LO, dma_addr)?;
        self.write_u64(base + regs::DESC_RAM_ADDR_LO, ram_word)?;
        self.device.write_reg(base + regs::DESC_LEN, len)?;
        self.device.write_reg(base + regs::DESC_TAG, tag | flags)?;

        let timeout = self.config.op_timeout;
        let status = self.wait_reg(base + regs::DESC_STATUS, what, timeout, |s| {
            s & regs::TAG_MASK == tag
        })?;
        if status & dma_engine::desc::STATUS_ERROR != 0 {
            tracing::warn!("{what}: tag {tag} failed with status {status:#010x}");
            return Err(BenchError::Transfer { status });
        }
        Ok(status)
    }

    /// Host to card: copies `len` bytes at `dma_addr` into card RAM.
    pub fn dma_read(&mut self, dma_addr: u64, ram_addr: u64, len: u32) -> BenchResult<u32> {
        self.single(regs::RD_DESC_BASE, "dma_read", dma_addr, ram_addr, len, 0)
    }

    /// Card to host: copies `len` bytes of card RAM to `dma_addr`.
    pub fn dma_write(&mut self, dma_addr: u64, ram_addr: u64, len: u32) -> BenchResult<u32> {
        self.single(regs::WR_DESC_BASE, "dma_write", dma_addr, ram_addr, len, 0)
    }

    /// Writes up to four bytes of `value` (little-endian) to `dma_addr`.
    pub fn dma_write_immediate(&mut self, dma_addr: u64, value: u32, len: u32) -> BenchResult<u32> {
        self.single(
            regs::WR_DESC_BASE,
            "dma_write_immediate",
            dma_addr,
            u64::from(value),
            len,
            regs::TAG_IMMEDIATE,
        )
    }

    /// Programs and runs one block run; returns its cycle count.
    pub fn block_run(
        &mut self,
        direction: Direction,
        pcie: SequencerConfig,
        ram: SequencerConfig,
        block_len: u32,
        block_count: u64,
    ) -> BenchResult<u64> {
        let (base, what) = match direction {
            Direction::Read => (regs::RD_BLOCK_BASE, "dma_block_read"),
            Direction::Write => (regs::WR_BLOCK_BASE, "dma_block_write"),
        };
        for (window, cfg) in [(regs::BLOCK_PCIE_WINDOW, pcie), (regs::BLOCK_RAM_WINDOW, ram)] {
            self.write_u64(base + window + regs::WINDOW_BASE, cfg.base)?;
            self.write_u64(base + window + regs::WINDOW_OFFSET, cfg.offset)?;
            self.write_u64(base + window + regs::WINDOW_MASK, cfg.mask)?;
            self.write_u64(base + window + regs::WINDOW_STRIDE, cfg.stride)?;
        }
        // clear cycle count
        self.write_u64(base + regs::BLOCK_CYCLES_LO, 0)?;
        self.device.write_reg(base + regs::BLOCK_LEN, block_len)?;
        self.write_u64(base + regs::BLOCK_COUNT_LO, block_count)?;
        self.device.write_reg(base + regs::BLOCK_CTRL, 1)?;

        let timeout = self.config.block_timeout;
        self.wait_reg(base + regs::BLOCK_CTRL, what, timeout, |ctrl| ctrl & 1 == 0)?;
        Ok(self.read_u64(base + regs::BLOCK_CYCLES_LO))
    }

    /// One benchmark point over the 16 KiB bench windows.
    pub fn block_bench(
        &mut self,
        direction: Direction,
        size: u64,
        stride: u64,
        count: u64,
    ) -> BenchResult<BenchReport> {
        let block_len = u32::try_from(size)
            .map_err(|_| BenchError::InvalidConfig("block size exceeds 32 bits"))?;
        let counters = [
            DmaCounter::OpCount,
            DmaCounter::OpLatency,
            DmaCounter::ReqCount,
            DmaCounter::ReqLatency,
        ]
        .map(|c| Counter::Dma(direction, c).index());
        let before = counters.map(|i| self.read_stat(i));

        let pcie = SequencerConfig::new(self.config.host_region, 0, BENCH_WINDOW_MASK, stride);
        let ram = SequencerConfig::new(0, 0, BENCH_WINDOW_MASK, stride);
        let cycles = self.block_run(direction, pcie, ram, block_len, count)?;

        let after = counters.map(|i| self.read_stat(i));
        let delta = |k: usize| after[k].wrapping_sub(before[k]);
        let report = BenchReport {
            direction,
            blocks: count,
            size,
            stride,
            cycles,
            ops: delta(0),
            op_latency: delta(1),
            requests: delta(2),
            request_latency: delta(3),
        };
        tracing::info!("{report}");
        Ok(report)
    }

    /// Runs [`Self::block_bench`] over every [`sweep_points`] pair.
    pub fn sweep(
        &mut self,
        direction: Direction,
        max_size: u64,
        count: u64,
    ) -> BenchResult<Vec<BenchReport>> {
        tracing::info!(
            "perform block {}",
            match direction {
                Direction::Read => "reads",
                Direction::Write => "writes",
            }
        );
        sweep_points(max_size)
            .into_iter()
            .map(|(size, stride)| self.block_bench(direction, size, stride, count))
            .collect()
    }
}

/// Length of the self-test pattern.
pub const SELF_TEST_LEN: usize = 256;
const SELF_TEST_RAM: u64 = 0x100;
const SELF_TEST_RETURN: u64 = 0x200;

impl BenchDriver<PcieLink> {
    /// Copies a counting pattern to the card and back and compares.
    pub fn self_test(&mut self) -> BenchResult<()> {
        let host = self.config.host_region;
        let pattern: Vec<u8> = (0..SELF_TEST_LEN).map(|k| k as u8).collect();
        self.device.link_mut().host_mut().write(host, &pattern)?;

        self.enable()?;
        tracing::info!("start copy to card");
        self.dma_read(host, SELF_TEST_RAM, SELF_TEST_LEN as u32)?;
        tracing::info!("start copy to host");
        self.dma_write(host + SELF_TEST_RETURN, SELF_TEST_RAM, SELF_TEST_LEN as u32)?;

        let back = self
            .device
            .link()
            .host()
            .read_vec(host + SELF_TEST_RETURN, SELF_TEST_LEN)?;
        crate::checks::verify_copy(&pattern, &back).map_err(BenchError::Mismatch)?;
        tracing::info!("test data matches");
        Ok(())
    }
}
