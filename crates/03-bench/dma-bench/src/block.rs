//! Block-mode runner: feeds the engine one descriptor per cycle from a pair
//! of address sequencers and tracks the run until every descriptor retired.

use dma_engine::{
    Counter, DescStatus, Descriptor, Direction, DmaCounter, DmaEngine, EngineError,
};
use serde::{Deserialize, Serialize};

use crate::regs;
use crate::sequencer::{BlockSequencer, SequencerConfig};
use crate::BenchResult;

/// Tag bit marking descriptors owned by a block runner.
pub const RUNNER_TAG: u16 = 0x100;

/// Shape of one block run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Host-side window.
    pub pcie: SequencerConfig,
    /// Card RAM window.
    pub ram: SequencerConfig,
    pub block_len: u32,
    pub block_count: u64,
}

impl BlockConfig {
    pub fn validate(&self) -> BenchResult<()> {
        self.pcie.validate()?;
        self.ram.validate()
    }
}

struct ActiveRun {
    pcie: BlockSequencer,
    ram: BlockSequencer,
    held: Option<Descriptor>,
    outstanding: u64,
    beat: u64,
}

/// Outcome counters of the last (or current) run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub completed: u64,
    pub errors: u64,
}

pub struct BlockRunner {
    direction: Direction,
    config: BlockConfig,
    run: Option<ActiveRun>,
    summary: RunSummary,
}

impl BlockRunner {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            config: BlockConfig::default(),
            run: None,
            summary: RunSummary::default(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: BlockConfig) {
        self.config = config;
    }

    pub fn is_busy(&self) -> bool {
        self.run.is_some()
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Beats not yet emitted; reaches 0 once the last descriptor is handed out.
    pub fn blocks_remaining(&self) -> u64 {
        match &self.run {
            Some(run) => run.pcie.remaining() + u64::from(run.held.is_some()),
            None => self.config.block_count,
        }
    }

    /// Starts a run from the current configuration. The cycle counter is
    /// left alone so that callers decide when to clear it. Does nothing
    /// while a run is active.
    pub fn start(&mut self) -> BenchResult<()> {
        if self.run.is_some() {
            tracing::warn!("{:?} block run already active", self.direction);
            return Ok(());
        }
        self.config.validate()?;
        let count = self.config.block_count;
        self.run = Some(ActiveRun {
            pcie: BlockSequencer::new(self.config.pcie, count)?,
            ram: BlockSequencer::new(self.config.ram, count)?,
            held: None,
            outstanding: 0,
            beat: 0,
        });
        self.summary.completed = 0;
        self.summary.errors = 0;
        tracing::debug!(
            "{:?} block run: {} blocks of {} bytes",
            self.direction,
            count,
            self.config.block_len
        );
        Ok(())
    }

    /// One cycle: emits at most one descriptor into `engine`.
    pub fn poll(&mut self, engine: &mut DmaEngine) -> usize {
        let Some(run) = self.run.as_mut() else {
            return 0;
        };
        self.summary.cycles = self.summary.cycles.saturating_add(1);

        let desc = match run.held.take() {
            Some(desc) => Some(desc),
            None => match (run.pcie.next(), run.ram.next()) {
                (Some(pcie_addr), Some(ram_addr)) => {
                    let tag = RUNNER_TAG | (run.beat & 0xFF) as u16;
                    run.beat += 1;
                    Some(match self.direction {
                        Direction::Read => {
                            Descriptor::read(pcie_addr, ram_addr, self.config.block_len, tag)
                        }
                        Direction::Write => {
                            Descriptor::write(pcie_addr, ram_addr, self.config.block_len, tag)
                        }
                    })
                }
                _ => None,
            },
        };

        let mut work = 0;
        if let Some(desc) = desc {
            match engine.submit(desc) {
                Err(EngineError::TableFull { .. }) => run.held = Some(desc),
                // Everything else yields exactly one status, malformed included.
                Ok(_) | Err(_) => {
                    run.outstanding += 1;
                    work = 1;
                }
            }
        }
        self.sync_registers();
        self.finish_if_drained(engine);
        work
    }

    /// Accounts a retired descriptor that carried [`RUNNER_TAG`].
    pub fn on_status(&mut self, status: &DescStatus, engine: &DmaEngine) {
        let Some(run) = self.run.as_mut() else {
            tracing::warn!("{:?} block status with no active run", self.direction);
            return;
        };
        run.outstanding = run.outstanding.saturating_sub(1);
        self.summary.completed += 1;
        if !status.is_ok() {
            self.summary.errors += 1;
        }
        self.finish_if_drained(engine);
    }

    fn sync_registers(&mut self) {
        if let Some(run) = &self.run {
            self.config.pcie.offset = run.pcie.offset();
            self.config.ram.offset = run.ram.offset();
            self.config.block_count = run.pcie.remaining() + u64::from(run.held.is_some());
        }
    }

    fn finish_if_drained(&mut self, engine: &DmaEngine) {
        let drained = self.run.as_ref().is_some_and(|run| {
            run.held.is_none() && run.pcie.is_done() && run.outstanding == 0
        });
        if drained {
            self.sync_registers();
            self.run = None;
            engine.stats().record_with_value(
                Counter::Dma(self.direction, DmaCounter::BlockCycles),
                self.summary.cycles,
            );
            tracing::debug!(
                "{:?} block run done: {} blocks in {} cycles ({} errors)",
                self.direction,
                self.summary.completed,
                self.summary.cycles,
                self.summary.errors
            );
        }
    }

    /// Register read at `offset` inside this runner's block.
    pub fn read_reg(&self, offset: u32) -> u32 {
        let window = |cfg: &SequencerConfig, rel: u32| -> u32 {
            let value = match rel & !0x7 {
                regs::WINDOW_BASE => cfg.base,
                regs::WINDOW_OFFSET => cfg.offset,
                regs::WINDOW_MASK => cfg.mask,
                regs::WINDOW_STRIDE => cfg.stride,
                _ => 0,
            };
            regs::get_half(value, rel & 0x4 != 0)
        };
        match offset {
            regs::BLOCK_CTRL => u32::from(self.is_busy()),
            regs::BLOCK_CYCLES_LO => regs::get_half(self.summary.cycles, false),
            regs::BLOCK_CYCLES_HI => regs::get_half(self.summary.cycles, true),
            regs::BLOCK_LEN => self.config.block_len,
            regs::BLOCK_COUNT_LO => regs::get_half(self.blocks_remaining(), false),
            regs::BLOCK_COUNT_HI => regs::get_half(self.blocks_remaining(), true),
            o if (regs::BLOCK_PCIE_WINDOW..regs::BLOCK_PCIE_WINDOW + regs::WINDOW_SPAN)
                .contains(&o) =>
            {
                window(&self.config.pcie, o - regs::BLOCK_PCIE_WINDOW)
            }
            o if (regs::BLOCK_RAM_WINDOW..regs::BLOCK_RAM_WINDOW + regs::WINDOW_SPAN)
                .contains(&o) =>
            {
                window(&self.config.ram, o - regs::BLOCK_RAM_WINDOW)
            }
            _ => 0,
        }
    }

    /// Register write at `offset`. Configuration writes during a run are ignored.
    pub fn write_reg(&mut self, offset: u32, value: u32) -> BenchResult<()> {
        match offset {
            regs::BLOCK_CTRL => {
                if value & 1 != 0 {
                    self.start()?;
                }
                return Ok(());
            }
            regs::BLOCK_CYCLES_LO => {
                regs::set_half(&mut self.summary.cycles, false, value);
                return Ok(());
            }
            regs::BLOCK_CYCLES_HI => {
                regs::set_half(&mut self.summary.cycles, true, value);
                return Ok(());
            }
            _ => {}
        }
        if self.is_busy() {
            tracing::warn!("ignoring block register {offset:#x} write during a run");
            return Ok(());
        }
        let window = |cfg: &mut SequencerConfig, rel: u32| {
            let high = rel & 0x4 != 0;
            let field = match rel & !0x7 {
                regs::WINDOW_BASE => &mut cfg.base,
                regs::WINDOW_OFFSET => &mut cfg.offset,
                regs::WINDOW_MASK => &mut cfg.mask,
                regs::WINDOW_STRIDE => &mut cfg.stride,
                _ => return,
            };
            regs::set_half(field, high, value);
        };
        match offset {
            regs::BLOCK_LEN => self.config.block_len = value,
            regs::BLOCK_COUNT_LO => regs::set_half(&mut self.config.block_count, false, value),
            regs::BLOCK_COUNT_HI => regs::set_half(&mut self.config.block_count, true, value),
            o if (regs::BLOCK_PCIE_WINDOW..regs::BLOCK_PCIE_WINDOW + regs::WINDOW_SPAN)
                .contains(&o) =>
            {
                window(&mut self.config.pcie, o - regs::BLOCK_PCIE_WINDOW)
            }
            o if (regs::BLOCK_RAM_WINDOW..regs::BLOCK_RAM_WINDOW + regs::WINDOW_SPAN)
                .contains(&o) =>
            {
                window(&mut self.config.ram, o - regs::BLOCK_RAM_WINDOW)
            }
            _ => tracing::trace!("write to unmapped block register {offset:#x}"),
        }
        Ok(())
    }
}
