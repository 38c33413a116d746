//! Reference transport: a root complex with host memory behind a PCIe link.
//!
//! [`PcieLink`] services read and write requests against its own host
//! [`MemRegion`], returns flow-control credits after a fixed latency and
//! answers reads with completions split at the configured completion size.
//! Test benches can make it misbehave in the ways real links do:
//!
//! * a pause generator stalls the link (no acceptance, no delivery) on every
//!   cycle it yields `true`;
//! * `reorder` adds random jitter so completions overtake each other;
//! * fault windows answer reads with an error status and reject writes.

use crate::credit::{data_credits_for, CreditClass, CreditCounts};
use crate::memory::MemRegion;
use crate::tlp::{Completion, CplStatus, LinkEvent, ReadRequest, Transport, WriteRequest};
use crate::{TransportError, TransportResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Shape and timing of a [`PcieLink`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bus address of the first byte of host memory.
    pub host_base: u64,
    /// Size of host memory in bytes.
    pub host_size: usize,
    /// Credits advertised for posted requests when the link comes up.
    pub posted_credits: CreditCounts,
    /// Credits advertised for non-posted requests when the link comes up.
    pub non_posted_credits: CreditCounts,
    /// Cycles between accepting a request and returning its credits.
    pub credit_return_latency: u32,
    /// Cycles between accepting a read and delivering its first completion.
    pub completion_latency: u32,
    /// Read completions never cross a multiple of this size (power of two).
    pub read_completion_boundary: u32,
    /// Randomly delay completions so they arrive out of order.
    pub reorder: bool,
    /// Seed for the reorder jitter.
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host_base: 0,
            host_size: 16 * 1024 * 1024,
            posted_credits: CreditCounts::new(32, 512),
            non_posted_credits: CreditCounts::new(32, 0),
            credit_return_latency: 8,
            completion_latency: 64,
            read_completion_boundary: 128,
            reorder: false,
            seed: 0x5eed,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> TransportResult<()> {
        if self.host_size == 0 {
            return Err(TransportError::InvalidCapacity {
                requested: 0,
                minimum: 1,
            });
        }
        let rcb = self.read_completion_boundary;
        if !rcb.is_power_of_two() || rcb < 4 {
            return Err(TransportError::InvalidCapacity {
                requested: u64::from(rcb),
                minimum: 4,
            });
        }
        Ok(())
    }
}

/// Running totals of link activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkMetrics {
    pub reads: u64,
    pub writes: u64,
    pub completions: u64,
    pub error_completions: u64,
    pub rejected_writes: u64,
    pub paused_cycles: u64,
}

#[derive(Clone, Copy, Debug)]
struct FaultWindow {
    start: u64,
    end: u64,
    status: CplStatus,
}

impl FaultWindow {
    fn overlaps(&self, addr: u64, len: u64) -> bool {
        addr < self.end && addr.saturating_add(len) > self.start
    }
}

/// Yields `true` on cycles where the link should stall.
pub type PauseGenerator = Box<dyn Iterator<Item = bool> + Send>;

/// Root-complex model implementing [`Transport`].
pub struct PcieLink {
    config: LinkConfig,
    host: MemRegion,
    now: u64,
    paused: bool,
    pause: Option<PauseGenerator>,
    /// Keyed by (due cycle, sequence) so same-cycle events keep their order.
    scheduled: BTreeMap<(u64, u64), LinkEvent>,
    seq: u64,
    ready: VecDeque<LinkEvent>,
    faults: Vec<FaultWindow>,
    rng: StdRng,
    metrics: LinkMetrics,
}

impl PcieLink {
    /// Brings up a link; the initial credit advertisement is delivered on the first poll.
    pub fn new(config: LinkConfig) -> TransportResult<Self> {
        config.validate()?;
        let host = MemRegion::new(config.host_base, config.host_size)?;
        let mut ready = VecDeque::new();
        ready.push_back(LinkEvent::Credits {
            class: CreditClass::Posted,
            counts: config.posted_credits,
        });
        ready.push_back(LinkEvent::Credits {
            class: CreditClass::NonPosted,
            counts: config.non_posted_credits,
        });
        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            config,
            host,
            now: 0,
            paused: false,
            pause: None,
            scheduled: BTreeMap::new(),
            seq: 0,
            ready,
            faults: Vec::new(),
            rng,
            metrics: LinkMetrics::default(),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Host memory as seen by the root complex.
    pub fn host(&self) -> &MemRegion {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut MemRegion {
        &mut self.host
    }

    /// Current link cycle.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn metrics(&self) -> LinkMetrics {
        self.metrics
    }

    /// Installs (or removes) the stall pattern applied from the next cycle on.
    pub fn set_pause_generator(&mut self, generator: Option<PauseGenerator>) {
        self.pause = generator;
        if self.pause.is_none() {
            self.paused = false;
        }
    }

    /// Makes every request touching `[addr, addr + len)` fail with `status`.
    pub fn inject_fault(&mut self, addr: u64, len: u64, status: CplStatus) {
        debug_assert!(!status.is_success(), "fault window needs an error status");
        self.faults.push(FaultWindow {
            start: addr,
            end: addr.saturating_add(len),
            status,
        });
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Number of events scheduled but not yet delivered.
    pub fn pending_events(&self) -> usize {
        self.scheduled.len() + self.ready.len()
    }

    fn fault_for(&self, addr: u64, len: u64) -> Option<CplStatus> {
        self.faults
            .iter()
            .find(|fault| fault.overlaps(addr, len))
            .map(|fault| fault.status)
    }

    fn schedule(&mut self, delay: u32, event: LinkEvent) {
        let due = self.now + u64::from(delay);
        self.scheduled.insert((due, self.seq), event);
        self.seq += 1;
    }

    fn return_credits(&mut self, class: CreditClass, counts: CreditCounts, delay: u32) {
        self.schedule(delay, LinkEvent::Credits { class, counts });
    }

    fn completion_delay(&mut self) -> u32 {
        let base = self.config.completion_latency;
        if self.config.reorder {
            base + self.rng.gen_range(0..=base.max(1))
        } else {
            base
        }
    }

    fn complete_with_error(&mut self, req: &ReadRequest, status: CplStatus) {
        tracing::warn!(
            "read of {} bytes at {:#x} completed with {:?}",
            req.len,
            req.addr,
            status
        );
        let delay = self.config.completion_latency;
        self.metrics.error_completions += 1;
        self.schedule(
            delay,
            LinkEvent::Completion(Completion {
                requester_tag: req.requester_tag,
                byte_offset: req.byte_offset,
                byte_count: req.len,
                data: Vec::new(),
                status,
                last: true,
                issued_at: req.issued_at,
            }),
        );
    }

    fn split_completions(&mut self, req: &ReadRequest) -> TransportResult<()> {
        let data = self.host.read_vec(req.addr, req.len as usize)?;
        let size = u64::from(self.config.read_completion_boundary);
        let mut addr = req.addr;
        let mut consumed = 0usize;
        while consumed < data.len() {
            let to_boundary = (size - (addr & (size - 1))) as usize;
            let len = to_boundary.min(data.len() - consumed);
            let delay = self.completion_delay();
            let last = consumed + len == data.len();
            self.schedule(
                delay,
                LinkEvent::Completion(Completion {
                    requester_tag: req.requester_tag,
                    byte_offset: req.byte_offset + consumed as u32,
                    byte_count: len as u32,
                    data: data[consumed..consumed + len].to_vec(),
                    status: CplStatus::Success,
                    last,
                    issued_at: req.issued_at,
                }),
            );
            addr += len as u64;
            consumed += len;
        }
        Ok(())
    }
}

impl Transport for PcieLink {
    fn tick(&mut self) {
        self.now += 1;
        self.paused = match self.pause.as_mut() {
            Some(generator) => generator.next().unwrap_or(false),
            None => false,
        };
        if self.paused {
            self.metrics.paused_cycles += 1;
            return;
        }

        while let Some(entry) = self.scheduled.first_entry() {
            if entry.key().0 > self.now {
                break;
            }
            self.ready.push_back(entry.remove());
        }
    }

    fn can_accept(&self) -> bool {
        !self.paused
    }

    fn send_read(&mut self, req: ReadRequest) -> TransportResult<()> {
        if self.paused {
            return Err(TransportError::LinkBusy);
        }
        self.metrics.reads += 1;
        let latency = self.config.credit_return_latency;
        self.return_credits(CreditClass::NonPosted, CreditCounts::new(1, 0), latency);

        let len = u64::from(req.len);
        if let Some(status) = self.fault_for(req.addr, len) {
            self.complete_with_error(&req, status);
        } else if !self.host.contains(req.addr, len) {
            self.complete_with_error(&req, CplStatus::UnsupportedRequest);
        } else {
            tracing::trace!("read {} bytes at {:#x}", req.len, req.addr);
            self.split_completions(&req)?;
        }
        Ok(())
    }

    fn send_write(&mut self, req: WriteRequest) -> TransportResult<()> {
        if self.paused {
            return Err(TransportError::LinkBusy);
        }
        self.metrics.writes += 1;
        let len = req.data.len() as u64;
        let credits = CreditCounts::new(1, data_credits_for(req.data.len() as u32));
        let latency = self.config.credit_return_latency;
        self.return_credits(CreditClass::Posted, credits, latency);

        if self.fault_for(req.addr, len).is_some() {
            self.metrics.rejected_writes += 1;
            tracing::warn!("write of {len} bytes at {:#x} rejected", req.addr);
            return Err(TransportError::Rejected {
                addr: req.addr,
                len,
            });
        }
        if let Err(err) = self.host.write(req.addr, &req.data) {
            self.metrics.rejected_writes += 1;
            tracing::warn!("write of {len} bytes at {:#x} dropped: {err}", req.addr);
            return Err(err);
        }
        tracing::trace!("wrote {len} bytes at {:#x}", req.addr);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<LinkEvent> {
        if self.paused {
            return None;
        }
        let event = self.ready.pop_front()?;
        if let LinkEvent::Completion(cpl) = &event {
            self.metrics.completions += 1;
            tracing::trace!(
                "completion tag={:#x} offset={} count={}",
                cpl.requester_tag,
                cpl.byte_offset,
                cpl.byte_count
            );
        }
        Some(event)
    }
}
