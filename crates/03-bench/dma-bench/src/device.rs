//! Register-level model of the benchmark card.
//!
//! The device owns the link and the engine and exposes the BAR register map
//! through [`DmaBenchDevice::read_reg`] / [`DmaBenchDevice::write_reg`]. A
//! descriptor is latched when its tag register is written and handed to the
//! engine on the next cycle the engine has room for it. Retirement statuses
//! are routed either to the channel status register or, when they carry
//! [`RUNNER_TAG`], back to the block runner that emitted them.

use std::collections::VecDeque;
use std::sync::Arc;

use dma_engine::{
    Counter, DescStatus, Descriptor, Direction, DmaEngine, EngineConfig, ErrorKind,
    StatsCollector, TlpCounter,
};
use pcie_transport::Transport;

use crate::block::{BlockRunner, RUNNER_TAG};
use crate::regs::{self, get_half, set_half};
use crate::{BenchError, BenchResult};

#[derive(Clone, Copy, Debug, Default)]
struct DescRegs {
    pcie_addr: u64,
    ram_addr: u64,
    len: u32,
    status: u32,
}

/// Accumulated error-monitor pulses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorMonitors {
    pub correctable: u64,
    pub uncorrectable: u64,
}

fn channel(direction: Direction) -> usize {
    match direction {
        Direction::Read => 0,
        Direction::Write => 1,
    }
}

pub struct DmaBenchDevice<T> {
    link: T,
    engine: DmaEngine,
    enabled: bool,
    irq_enable: u32,
    irq_count: [u64; 2],
    desc: [DescRegs; 2],
    pending: VecDeque<Descriptor>,
    runners: [BlockRunner; 2],
    monitors: ErrorMonitors,
}

impl<T: Transport> DmaBenchDevice<T> {
    pub fn new(link: T, config: EngineConfig) -> BenchResult<Self> {
        Ok(Self {
            link,
            engine: DmaEngine::new(config)?,
            enabled: false,
            irq_enable: 0,
            irq_count: [0; 2],
            desc: [DescRegs::default(); 2],
            pending: VecDeque::new(),
            runners: [
                BlockRunner::new(Direction::Read),
                BlockRunner::new(Direction::Write),
            ],
            monitors: ErrorMonitors::default(),
        })
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    pub fn engine(&self) -> &DmaEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut DmaEngine {
        &mut self.engine
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        self.engine.stats()
    }

    pub fn runner(&self, direction: Direction) -> &BlockRunner {
        &self.runners[channel(direction)]
    }

    pub fn runner_mut(&mut self, direction: Direction) -> &mut BlockRunner {
        &mut self.runners[channel(direction)]
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Done interrupts raised so far on `direction`'s channel.
    pub fn irq_count(&self, direction: Direction) -> u64 {
        self.irq_count[channel(direction)]
    }

    pub fn error_monitors(&self) -> ErrorMonitors {
        self.monitors
    }

    /// Channel status register value.
    pub fn status(&self, direction: Direction) -> u32 {
        self.desc[channel(direction)].status
    }

    /// Nothing latched, live, or running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.engine.is_idle()
            && self.runners.iter().all(|r| !r.is_busy())
    }

    /// Advances link and engine by one cycle.
    pub fn tick(&mut self) {
        self.link.tick();
        if self.enabled {
            self.feed_pending();
            for runner in &mut self.runners {
                runner.poll(&mut self.engine);
            }
        }
        self.engine.tick(&mut self.link);
        while let Some(status) = self.engine.pop_status() {
            self.route(status);
        }
    }

    /// Ticks until `done` holds, giving up after `max_cycles`.
    pub fn run_until(
        &mut self,
        what: &'static str,
        max_cycles: u64,
        mut done: impl FnMut(&Self) -> bool,
    ) -> BenchResult<u64> {
        for cycle in 0..max_cycles {
            if done(self) {
                return Ok(cycle);
            }
            self.tick();
        }
        if done(self) {
            return Ok(max_cycles);
        }
        Err(BenchError::Timeout {
            what,
            cycles: max_cycles,
        })
    }

    fn feed_pending(&mut self) {
        while let Some(desc) = self.pending.front().copied() {
            match self.engine.submit(desc) {
                Err(err) if err.is_retryable() => break,
                Err(err) => {
                    tracing::warn!("descriptor tag {:#x} refused: {err}", desc.tag);
                    self.pending.pop_front();
                }
                Ok(_) => {
                    self.pending.pop_front();
                }
            }
        }
    }

    fn route(&mut self, status: DescStatus) {
        if let Some(kind) = status.error {
            match kind {
                ErrorKind::Malformed => {}
                kind if kind.is_correctable() => {
                    tracing::info!("correctable error asserted ({kind:?})");
                    self.monitors.correctable += 1;
                }
                kind => {
                    tracing::warn!("uncorrectable error asserted ({kind:?})");
                    self.monitors.uncorrectable += 1;
                }
            }
        }

        let ch = channel(status.direction);
        if status.tag & RUNNER_TAG != 0 {
            self.runners[ch].on_status(&status, &self.engine);
            return;
        }
        self.desc[ch].status = status.to_register();
        if self.irq_enable & (1 << ch) != 0 {
            self.irq_count[ch] += 1;
        }
    }

    fn record_mmio(&self, write: bool) {
        let stats = self.engine.stats();
        stats.record_with_value(Counter::Tlp(TlpCounter::RxHdrDw), 3);
        if write {
            stats.record(Counter::Tlp(TlpCounter::RxMemWr));
            stats.record(Counter::Tlp(TlpCounter::RxPayloadDw));
        } else {
            stats.record(Counter::Tlp(TlpCounter::RxMemRd));
            stats.record(Counter::Tlp(TlpCounter::RxReqDw));
            stats.record(Counter::Tlp(TlpCounter::TxCpl));
            stats.record(Counter::Tlp(TlpCounter::TxCplDw));
        }
    }

    /// 32-bit register read.
    pub fn read_reg(&self, offset: u32) -> u32 {
        self.record_mmio(false);
        match offset {
            regs::CTRL_ENABLE => u32::from(self.enabled),
            regs::IRQ_ENABLE => self.irq_enable,
            o if (regs::RD_DESC_BASE..regs::RD_DESC_BASE + 0x20).contains(&o) => {
                self.read_desc_reg(Direction::Read, o - regs::RD_DESC_BASE)
            }
            o if (regs::WR_DESC_BASE..regs::WR_DESC_BASE + 0x20).contains(&o) => {
                self.read_desc_reg(Direction::Write, o - regs::WR_DESC_BASE)
            }
            o if (regs::RD_BLOCK_BASE..regs::RD_BLOCK_BASE + 0x100).contains(&o) => {
                self.runners[0].read_reg(o - regs::RD_BLOCK_BASE)
            }
            o if (regs::WR_BLOCK_BASE..regs::WR_BLOCK_BASE + 0x100).contains(&o) => {
                self.runners[1].read_reg(o - regs::WR_BLOCK_BASE)
            }
            o if (regs::STATS_BASE..regs::stat_counter(dma_engine::stats::STATS_LEN))
                .contains(&o) =>
            {
                let rel = o - regs::STATS_BASE;
                let value = self
                    .engine
                    .stats()
                    .read_index((rel / regs::STATS_STRIDE) as usize);
                get_half(value, rel & 0x4 != 0)
            }
            _ => 0,
        }
    }

    fn read_desc_reg(&self, direction: Direction, rel: u32) -> u32 {
        let regs_ = &self.desc[channel(direction)];
        match rel {
            regs::DESC_PCIE_ADDR_LO => get_half(regs_.pcie_addr, false),
            regs::DESC_PCIE_ADDR_HI => get_half(regs_.pcie_addr, true),
            regs::DESC_RAM_ADDR_LO => get_half(regs_.ram_addr, false),
            regs::DESC_RAM_ADDR_HI => get_half(regs_.ram_addr, true),
            regs::DESC_LEN => regs_.len,
            regs::DESC_STATUS => regs_.status,
            _ => 0,
        }
    }

    /// 32-bit register write.
    pub fn write_reg(&mut self, offset: u32, value: u32) -> BenchResult<()> {
        self.record_mmio(true);
        match offset {
            regs::CTRL_ENABLE => {
                self.enabled = value & 1 != 0;
                tracing::debug!("DMA {}", if self.enabled { "enabled" } else { "disabled" });
            }
            regs::IRQ_ENABLE => self.irq_enable = value & 0x3,
            o if (regs::RD_DESC_BASE..regs::RD_DESC_BASE + 0x20).contains(&o) => {
                self.write_desc_reg(Direction::Read, o - regs::RD_DESC_BASE, value);
            }
            o if (regs::WR_DESC_BASE..regs::WR_DESC_BASE + 0x20).contains(&o) => {
                self.write_desc_reg(Direction::Write, o - regs::WR_DESC_BASE, value);
            }
            o if (regs::RD_BLOCK_BASE..regs::RD_BLOCK_BASE + 0x100).contains(&o) => {
                self.runners[0].write_reg(o - regs::RD_BLOCK_BASE, value)?;
            }
            o if (regs::WR_BLOCK_BASE..regs::WR_BLOCK_BASE + 0x100).contains(&o) => {
                self.runners[1].write_reg(o - regs::WR_BLOCK_BASE, value)?;
            }
            _ => tracing::trace!("write to read-only or unmapped register {offset:#x}"),
        }
        Ok(())
    }

    fn write_desc_reg(&mut self, direction: Direction, rel: u32, value: u32) {
        let regs_ = &mut self.desc[channel(direction)];
        match rel {
            regs::DESC_PCIE_ADDR_LO => set_half(&mut regs_.pcie_addr, false, value),
            regs::DESC_PCIE_ADDR_HI => set_half(&mut regs_.pcie_addr, true, value),
            regs::DESC_RAM_ADDR_LO => set_half(&mut regs_.ram_addr, false, value),
            regs::DESC_RAM_ADDR_HI => set_half(&mut regs_.ram_addr, true, value),
            regs::DESC_LEN => regs_.len = value,
            regs::DESC_TAG => {
                let tag = (value & regs::TAG_MASK) as u16;
                let desc = if value & regs::TAG_IMMEDIATE != 0 {
                    match direction {
                        Direction::Write => Descriptor::immediate(
                            regs_.pcie_addr,
                            regs_.ram_addr as u32,
                            regs_.len,
                            tag,
                        ),
                        // Rejected by the engine as a malformed descriptor.
                        Direction::Read => Descriptor {
                            immediate: Some(regs_.ram_addr as u32),
                            ..Descriptor::read(regs_.pcie_addr, regs_.ram_addr, regs_.len, tag)
                        },
                    }
                } else {
                    match direction {
                        Direction::Read => {
                            Descriptor::read(regs_.pcie_addr, regs_.ram_addr, regs_.len, tag)
                        }
                        Direction::Write => {
                            Descriptor::write(regs_.pcie_addr, regs_.ram_addr, regs_.len, tag)
                        }
                    }
                };
                tracing::trace!("latched {direction:?} descriptor tag {tag:#x}");
                self.pending.push_back(desc);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcie_transport::{LinkConfig, PcieLink};

    fn device() -> DmaBenchDevice<PcieLink> {
        let link = PcieLink::new(LinkConfig {
            host_size: 64 * 1024,
            ..LinkConfig::default()
        })
        .unwrap();
        DmaBenchDevice::new(link, EngineConfig::default()).unwrap()
    }

    #[test]
    fn descriptors_wait_for_enable() {
        let mut dev = device();
        dev.write_reg(regs::RD_DESC_BASE + regs::DESC_LEN, 16).unwrap();
        dev.write_reg(regs::RD_DESC_BASE + regs::DESC_TAG, 1).unwrap();
        for _ in 0..200 {
            dev.tick();
        }
        assert_eq!(dev.read_reg(regs::RD_DESC_BASE + regs::DESC_STATUS), 0);

        dev.write_reg(regs::CTRL_ENABLE, 1).unwrap();
        dev.run_until("read", 1_000, |d| d.is_idle()).unwrap();
        assert_eq!(dev.read_reg(regs::RD_DESC_BASE + regs::DESC_STATUS), 0x8000_0001);
    }

    #[test]
    fn irq_counts_follow_enable_mask() {
        let mut dev = device();
        dev.write_reg(regs::CTRL_ENABLE, 1).unwrap();
        dev.write_reg(regs::IRQ_ENABLE, 0b10).unwrap();
        dev.write_reg(regs::WR_DESC_BASE + regs::DESC_LEN, 8).unwrap();
        dev.write_reg(regs::WR_DESC_BASE + regs::DESC_TAG, 2).unwrap();
        dev.write_reg(regs::RD_DESC_BASE + regs::DESC_LEN, 8).unwrap();
        dev.write_reg(regs::RD_DESC_BASE + regs::DESC_TAG, 3).unwrap();
        dev.run_until("both", 1_000, |d| d.is_idle()).unwrap();
        assert_eq!(dev.irq_count(Direction::Write), 1);
        assert_eq!(dev.irq_count(Direction::Read), 0);
    }

    #[test]
    fn statistics_bank_is_register_mapped() {
        let mut dev = device();
        dev.write_reg(regs::CTRL_ENABLE, 1).unwrap();
        dev.write_reg(regs::WR_DESC_BASE + regs::DESC_LEN, 64).unwrap();
        dev.write_reg(regs::WR_DESC_BASE + regs::DESC_TAG, 5).unwrap();
        dev.run_until("write", 1_000, |d| d.is_idle()).unwrap();
        assert_eq!(dev.read_reg(regs::stat_counter(48)), 1);
        assert_eq!(dev.read_reg(regs::stat_counter(48) + 4), 0);
        assert_eq!(dev.read_reg(regs::stat_counter(17)), 1, "one memory write TLP");
        assert!(dev.read_reg(regs::stat_counter(1)) >= 3, "MMIO writes counted");
    }

    #[test]
    fn immediate_flag_on_read_channel_is_malformed() {
        let mut dev = device();
        dev.write_reg(regs::CTRL_ENABLE, 1).unwrap();
        dev.write_reg(regs::RD_DESC_BASE + regs::DESC_LEN, 4).unwrap();
        dev.write_reg(regs::RD_DESC_BASE + regs::DESC_TAG, regs::TAG_IMMEDIATE | 7)
            .unwrap();
        dev.run_until("reject", 10, |d| d.is_idle()).unwrap();
        let (done, error, tag) =
            dma_engine::decode_status(dev.read_reg(regs::RD_DESC_BASE + regs::DESC_STATUS));
        assert!(done);
        assert_eq!(error, Some(ErrorKind::Malformed));
        assert_eq!(tag, 7);
        assert_eq!(dev.error_monitors(), ErrorMonitors::default());
    }
}
