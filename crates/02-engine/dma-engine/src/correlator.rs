//! Routes read completions back to their operation-table entry.

use std::sync::Arc;

use pcie_transport::CplStatus;

use crate::desc::{Direction, ErrorKind};
use crate::op_table::{OpTable, OpTag, RetiredOp};
use crate::stats::{Counter, DmaCounter, StatsCollector, TlpCounter};

/// What the engine should do with a completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Correlation {
    /// Tag is dead or not a read; drop the completion.
    Stale,
    /// Credited; `copy_to` is where the payload belongs in card RAM.
    Progress { copy_to: Option<u64> },
    /// Credited and the entry retired.
    Retired {
        copy_to: Option<u64>,
        op: RetiredOp,
    },
}

pub struct Correlator {
    stats: Arc<StatsCollector>,
}

impl Correlator {
    pub fn new(stats: Arc<StatsCollector>) -> Self {
        Self { stats }
    }

    /// Matches one completion to `tag`.
    ///
    /// Completions may arrive in any order; bytes accumulate until the
    /// descriptor is covered. An error status retires the entry at once, and
    /// a completion reaching past the outstanding bytes counts as an overrun.
    pub fn on_completion(
        &self,
        table: &mut OpTable,
        tag: OpTag,
        byte_offset: u32,
        byte_count: u32,
        status: CplStatus,
    ) -> Correlation {
        self.record_packet(byte_count, status);

        let (ram_addr, len) = match table.lookup(tag) {
            Some(entry) if entry.desc.direction == Direction::Read => {
                (entry.desc.ram_addr, entry.desc.len)
            }
            _ => {
                self.stats
                    .record(Counter::read(DmaCounter::StaleCompletion));
                tracing::warn!(
                    "discarding completion for dead tag {}:{} ({byte_count} bytes at +{byte_offset})",
                    tag.index,
                    tag.generation
                );
                return Correlation::Stale;
            }
        };

        let error = ErrorKind::from_completion(status).or_else(|| {
            let end = u64::from(byte_offset) + u64::from(byte_count);
            (end > u64::from(len)).then_some(ErrorKind::Overrun)
        });
        let copy_to = error
            .is_none()
            .then(|| ram_addr + u64::from(byte_offset));

        match table.update(tag, byte_count, error) {
            Some(op) => {
                // An overrun detected by the table invalidates the payload too.
                let copy_to = copy_to.filter(|_| op.error.is_none());
                Correlation::Retired { copy_to, op }
            }
            None => Correlation::Progress { copy_to },
        }
    }

    fn record_packet(&self, byte_count: u32, status: CplStatus) {
        let stats = &self.stats;
        stats.record(Counter::Tlp(TlpCounter::RxCpl));
        stats.record_with_value(Counter::Tlp(TlpCounter::RxHdrDw), 3);
        match status {
            CplStatus::Success => stats.record_with_value(
                Counter::Tlp(TlpCounter::RxCplDw),
                u64::from(byte_count.div_ceil(4)),
            ),
            CplStatus::UnsupportedRequest => stats.record(Counter::Tlp(TlpCounter::RxCplUr)),
            CplStatus::CompleterAbort => stats.record(Counter::Tlp(TlpCounter::RxCplCa)),
            CplStatus::Poisoned => stats.record(Counter::Tlp(TlpCounter::RxEp)),
        }
    }
}
