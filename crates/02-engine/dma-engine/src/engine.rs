//! Cycle-stepped DMA engine.
//!
//! Each [`DmaEngine::tick`] first drains every pending transport event
//! (credit returns and completions), then offers at most one bus request.
//! Nothing blocks: an exhausted credit pool holds the request for a later
//! cycle and a full operation table is reported back to the submitter.

use std::collections::VecDeque;
use std::sync::Arc;

use pcie_transport::{
    Completion, CreditClass, CreditCounts, CreditPool, LinkEvent, MemRegion, ReadRequest,
    Transport, TransportError, WriteRequest,
};

use crate::config::EngineConfig;
use crate::correlator::{Correlation, Correlator};
use crate::desc::{DescStatus, Descriptor, Direction, ErrorKind, IMMEDIATE_MAX_LEN};
use crate::op_table::{OpTable, OpTag, RetiredOp};
use crate::segment::{Chunk, Segmenter};
use crate::stats::{Counter, DmaCounter, StatsCollector, TlpCounter};
use crate::{EngineError, EngineResult};

struct PendingOp {
    direction: Direction,
    segments: Segmenter,
}

struct HeldChunk {
    chunk: Chunk,
    direction: Direction,
    /// Cycle of the first attempt to issue this chunk.
    since: u64,
}

/// Why the last issue attempt did not put a request on the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stall {
    CreditStarved,
    LinkBusy,
}

pub struct DmaEngine {
    config: EngineConfig,
    credits: CreditPool,
    table: OpTable,
    correlator: Correlator,
    issue: VecDeque<PendingOp>,
    held: Option<HeldChunk>,
    ram: MemRegion,
    statuses: VecDeque<DescStatus>,
    stats: Arc<StatsCollector>,
    cycle: u64,
    last_stall: Option<Stall>,
}

impl DmaEngine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_stats(config, Arc::new(StatsCollector::new()))
    }

    /// Builds an engine recording into an existing counter bank.
    pub fn with_stats(config: EngineConfig, stats: Arc<StatsCollector>) -> EngineResult<Self> {
        config.validate()?;
        let table = OpTable::new(config.op_table_size)?;
        let ram = MemRegion::new(config.ram_base, config.ram_size)?;
        Ok(Self {
            credits: CreditPool::new(),
            table,
            correlator: Correlator::new(Arc::clone(&stats)),
            issue: VecDeque::new(),
            held: None,
            ram,
            statuses: VecDeque::new(),
            stats,
            cycle: 0,
            last_stall: None,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.stats
    }

    pub fn credits(&self) -> &CreditPool {
        &self.credits
    }

    pub fn table(&self) -> &OpTable {
        &self.table
    }

    pub fn ram(&self) -> &MemRegion {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut MemRegion {
        &mut self.ram
    }

    /// Engine cycles elapsed.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn last_stall(&self) -> Option<Stall> {
        self.last_stall
    }

    /// True when nothing is live, queued or held.
    pub fn is_idle(&self) -> bool {
        self.table.live() == 0 && self.issue.is_empty() && self.held.is_none()
    }

    /// Admits a descriptor.
    ///
    /// Zero-length descriptors complete at once and return `Ok(None)`.
    /// Malformed descriptors are reported both as an error status and as
    /// `Err(Malformed)`. `Err(TableFull)` is back-pressure: nothing was
    /// recorded and the caller should retry later.
    pub fn submit(&mut self, desc: Descriptor) -> EngineResult<Option<OpTag>> {
        if let Err(err) = self.check(&desc) {
            tracing::warn!("rejecting descriptor tag {:#x}: {err}", desc.tag);
            let status = DescStatus {
                direction: desc.direction,
                tag: desc.tag,
                len: desc.len,
                error: Some(ErrorKind::Malformed),
                latency: 0,
            };
            self.record_status(&status);
            self.statuses.push_back(status);
            return Err(err);
        }

        if desc.len == 0 {
            let status = DescStatus {
                direction: desc.direction,
                tag: desc.tag,
                len: 0,
                error: None,
                latency: 0,
            };
            self.record_status(&status);
            self.statuses.push_back(status);
            return Ok(None);
        }

        let tag = match self.table.allocate(desc, self.cycle) {
            Ok(tag) => tag,
            Err(err) => {
                self.stats
                    .record(Counter::Dma(desc.direction, DmaCounter::StallTable));
                return Err(err);
            }
        };

        let bound = match desc.direction {
            Direction::Read => self.config.max_read_request_size,
            Direction::Write => self.config.max_payload_size,
        };
        self.issue.push_back(PendingOp {
            direction: desc.direction,
            segments: Segmenter::new(desc.pcie_addr, desc.len, bound, self.config.boundary, tag),
        });
        tracing::trace!(
            "admitted {:?} tag {:#x} as slot {}:{} ({} bytes)",
            desc.direction,
            desc.tag,
            tag.index,
            tag.generation,
            desc.len
        );
        Ok(Some(tag))
    }

    fn check(&self, desc: &Descriptor) -> EngineResult<()> {
        if desc.pcie_addr.checked_add(u64::from(desc.len)).is_none() {
            return Err(EngineError::Malformed("host address range overflows"));
        }
        match desc.immediate {
            Some(_) if desc.direction == Direction::Read => {
                Err(EngineError::Malformed("immediate payload on a read"))
            }
            Some(_) if desc.len > IMMEDIATE_MAX_LEN => {
                Err(EngineError::Malformed("immediate payload longer than 4 bytes"))
            }
            Some(_) => Ok(()),
            None if desc.len > 0 && !self.ram.contains(desc.ram_addr, u64::from(desc.len)) => {
                Err(EngineError::Malformed("RAM window out of range"))
            }
            None => Ok(()),
        }
    }

    /// Oldest retired descriptor status, if any.
    pub fn pop_status(&mut self) -> Option<DescStatus> {
        self.statuses.pop_front()
    }

    /// Advances one cycle against `link`.
    pub fn tick<T: Transport + ?Sized>(&mut self, link: &mut T) {
        self.cycle += 1;
        while let Some(event) = link.poll_event() {
            match event {
                LinkEvent::Credits { class, counts } => {
                    self.credits.replenish(class, counts.header, counts.data);
                }
                LinkEvent::Completion(cpl) => self.on_completion(cpl),
            }
        }
        self.issue_one(link);
    }

    fn on_completion(&mut self, cpl: Completion) {
        let tag = OpTag::from_wire(cpl.requester_tag);
        let outcome = self.correlator.on_completion(
            &mut self.table,
            tag,
            cpl.byte_offset,
            cpl.byte_count,
            cpl.status,
        );
        if cpl.last && !matches!(outcome, Correlation::Stale) {
            self.stats.record_with_value(
                Counter::read(DmaCounter::ReqLatency),
                self.cycle.saturating_sub(cpl.issued_at),
            );
        }
        match outcome {
            Correlation::Stale => {}
            Correlation::Progress { copy_to } => self.land(copy_to, &cpl.data),
            Correlation::Retired { copy_to, op } => {
                self.land(copy_to, &cpl.data);
                self.finish(op);
            }
        }
    }

    fn land(&mut self, copy_to: Option<u64>, data: &[u8]) {
        let Some(addr) = copy_to else { return };
        if let Err(err) = self.ram.write(addr, data) {
            // Descriptors are range-checked at admission.
            tracing::error!("completion payload outside card RAM: {err}");
        }
    }

    fn next_chunk(&mut self) -> Option<(Chunk, Direction)> {
        while let Some(op) = self.issue.front_mut() {
            if self.table.lookup(op.segments.tag()).is_none() {
                // Retired early on an error; drop what was never issued.
                self.issue.pop_front();
                continue;
            }
            match op.segments.next() {
                Some(chunk) => {
                    let direction = op.direction;
                    if op.segments.is_done() {
                        self.issue.pop_front();
                    }
                    return Some((chunk, direction));
                }
                None => {
                    self.issue.pop_front();
                }
            }
        }
        None
    }

    fn issue_one<T: Transport + ?Sized>(&mut self, link: &mut T) {
        let held = match self.held.take() {
            Some(held) if self.table.lookup(held.chunk.tag).is_some() => held,
            _ => match self.next_chunk() {
                Some((chunk, direction)) => HeldChunk {
                    chunk,
                    direction,
                    since: self.cycle,
                },
                None => {
                    self.last_stall = None;
                    return;
                }
            },
        };

        if !link.can_accept() {
            self.stall(held, Stall::LinkBusy);
            return;
        }

        let payload = match held.direction {
            Direction::Read => None,
            Direction::Write => match self.write_payload(&held.chunk) {
                Ok(data) => Some(data),
                Err(err) => {
                    tracing::error!("no payload for write chunk at {:#x}: {err}", held.chunk.addr);
                    self.fail(held.chunk.tag, ErrorKind::Malformed);
                    return;
                }
            },
        };

        let (class, counts) = match held.direction {
            Direction::Read => (CreditClass::NonPosted, CreditCounts::new(1, 0)),
            Direction::Write => (
                CreditClass::Posted,
                CreditCounts::for_request(CreditClass::Posted, held.chunk.len),
            ),
        };
        if !self.credits.admit_counts(class, counts) {
            self.stall(held, Stall::CreditStarved);
            return;
        }

        let result = match payload {
            None => self.send_read(link, &held.chunk),
            Some(data) => self.send_write(link, &held.chunk, data),
        };
        match result {
            Ok(()) => {
                self.last_stall = None;
                if held.direction == Direction::Write {
                    self.stats.record_with_value(
                        Counter::write(DmaCounter::ReqLatency),
                        self.cycle - held.since,
                    );
                    if let Some(op) = self.table.update(held.chunk.tag, held.chunk.len, None) {
                        self.finish(op);
                    }
                }
            }
            Err(TransportError::LinkBusy) => {
                self.credits.replenish(class, counts.header, counts.data);
                self.stall(held, Stall::LinkBusy);
            }
            Err(err) => {
                tracing::warn!(
                    "{:?} request of {} bytes at {:#x} failed: {err}",
                    held.direction,
                    held.chunk.len,
                    held.chunk.addr
                );
                self.last_stall = None;
                self.fail(held.chunk.tag, ErrorKind::from_transport(&err));
            }
        }
    }

    fn fail(&mut self, tag: OpTag, kind: ErrorKind) {
        if let Some(op) = self.table.update(tag, 0, Some(kind)) {
            self.finish(op);
        }
    }

    fn write_payload(&self, chunk: &Chunk) -> EngineResult<Vec<u8>> {
        let desc = self
            .table
            .lookup(chunk.tag)
            .map(|entry| entry.desc)
            .ok_or(EngineError::Malformed("write chunk for a dead tag"))?;
        let data = match desc.immediate {
            Some(value) => {
                let start = chunk.offset as usize;
                value
                    .to_le_bytes()
                    .get(start..start + chunk.len as usize)
                    .ok_or(EngineError::Malformed("immediate chunk past the payload"))?
                    .to_vec()
            }
            None => self
                .ram
                .read_vec(desc.ram_addr + u64::from(chunk.offset), chunk.len as usize)?,
        };
        Ok(data)
    }

    fn stall(&mut self, held: HeldChunk, reason: Stall) {
        let counter = match reason {
            Stall::CreditStarved => DmaCounter::StallCredit,
            Stall::LinkBusy => DmaCounter::StallBusy,
        };
        self.stats.record(Counter::Dma(held.direction, counter));
        self.last_stall = Some(reason);
        self.held = Some(held);
    }

    fn send_read<T: Transport + ?Sized>(
        &mut self,
        link: &mut T,
        chunk: &Chunk,
    ) -> Result<(), TransportError> {
        link.send_read(ReadRequest {
            requester_tag: chunk.tag.to_wire(),
            addr: chunk.addr,
            len: chunk.len,
            byte_offset: chunk.offset,
            issued_at: self.cycle,
        })?;
        self.table.mark_issued(chunk.tag, chunk.len);
        self.record_request(Direction::Read, chunk);
        tracing::trace!("read request {} bytes at {:#x}", chunk.len, chunk.addr);
        Ok(())
    }

    fn send_write<T: Transport + ?Sized>(
        &mut self,
        link: &mut T,
        chunk: &Chunk,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        link.send_write(WriteRequest {
            addr: chunk.addr,
            data,
        })?;
        self.table.mark_issued(chunk.tag, chunk.len);
        self.record_request(Direction::Write, chunk);
        tracing::trace!("write request {} bytes at {:#x}", chunk.len, chunk.addr);
        Ok(())
    }

    fn record_request(&self, direction: Direction, chunk: &Chunk) {
        let stats = &self.stats;
        let header_dw = if chunk.addr > u64::from(u32::MAX) { 4 } else { 3 };
        let first_dw = chunk.addr / 4;
        let last_dw = (chunk.addr + u64::from(chunk.len)).div_ceil(4);
        let dwords = last_dw - first_dw;
        stats.record(Counter::Dma(direction, DmaCounter::ReqCount));
        stats.record_with_value(Counter::Tlp(TlpCounter::TxHdrDw), header_dw);
        match direction {
            Direction::Read => {
                stats.record(Counter::Tlp(TlpCounter::TxMemRd));
                stats.record_with_value(Counter::Tlp(TlpCounter::TxReqDw), dwords);
            }
            Direction::Write => {
                stats.record(Counter::Tlp(TlpCounter::TxMemWr));
                stats.record_with_value(Counter::Tlp(TlpCounter::TxPayloadDw), dwords);
            }
        }
    }

    fn finish(&mut self, op: RetiredOp) {
        let status = DescStatus {
            direction: op.desc.direction,
            tag: op.desc.tag,
            len: op.desc.len,
            error: op.error,
            latency: self.cycle.saturating_sub(op.started_at),
        };
        match status.error {
            Some(kind) => tracing::warn!(
                "{:?} tag {:#x} retired with {kind:?} after {} of {} bytes",
                status.direction,
                status.tag,
                op.bytes_done,
                status.len
            ),
            None => tracing::debug!(
                "{:?} tag {:#x} done: {} bytes in {} cycles",
                status.direction,
                status.tag,
                status.len,
                status.latency
            ),
        }
        self.record_status(&status);
        self.statuses.push_back(status);
    }

    fn record_status(&self, status: &DescStatus) {
        let dir = status.direction;
        let stats = &self.stats;
        stats.record(Counter::Dma(dir, DmaCounter::OpCount));
        stats.record_with_value(Counter::Dma(dir, DmaCounter::OpLatency), status.latency);
        stats.record_min(Counter::Dma(dir, DmaCounter::OpLatencyMin), status.latency);
        stats.record_max(Counter::Dma(dir, DmaCounter::OpLatencyMax), status.latency);
        if status.is_ok() {
            stats.record_with_value(Counter::Dma(dir, DmaCounter::OpBytes), u64::from(status.len));
        } else {
            stats.record(Counter::Dma(dir, DmaCounter::OpError));
        }
    }
}
