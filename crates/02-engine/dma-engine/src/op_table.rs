//! Fixed-capacity registry of in-flight descriptors.
//!
//! Each slot carries a generation that is bumped when its entry retires, so a
//! tag names one specific admission of a slot. Lookups with an old generation
//! miss, which is what lets late completions for a retired descriptor be
//! discarded instead of being credited to whoever holds the slot next.

use crate::desc::{Descriptor, ErrorKind};
use crate::tag_pool::TagPool;
use crate::{EngineError, EngineResult};

/// Slot index plus generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpTag {
    pub index: u16,
    pub generation: u32,
}

impl OpTag {
    /// Packs the tag into the opaque requester tag carried by bus requests.
    pub fn to_wire(self) -> u64 {
        (u64::from(self.generation) << 16) | u64::from(self.index)
    }

    pub fn from_wire(wire: u64) -> Self {
        Self {
            index: wire as u16,
            generation: (wire >> 16) as u32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpState {
    /// Allocated; no request issued yet.
    Admitted,
    /// At least one request issued.
    InFlight,
    /// Every byte accounted for.
    Complete,
    /// Sticky error recorded.
    Error,
    /// Slot released; the tag is dead.
    Retired,
}

#[derive(Clone, Debug)]
pub struct OpEntry {
    pub tag: OpTag,
    pub desc: Descriptor,
    /// Bytes not yet completed.
    pub remaining: u32,
    /// Bytes issued but not yet completed.
    pub in_flight: u32,
    pub error: Option<ErrorKind>,
    /// Engine cycle at admission.
    pub started_at: u64,
    pub state: OpState,
}

/// Final record of an entry removed from the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetiredOp {
    pub tag: OpTag,
    pub desc: Descriptor,
    pub error: Option<ErrorKind>,
    pub started_at: u64,
    /// Bytes completed before retirement.
    pub bytes_done: u32,
}

struct Slot {
    generation: u32,
    entry: Option<OpEntry>,
}

pub struct OpTable {
    slots: Vec<Slot>,
    free: TagPool,
}

impl OpTable {
    pub fn new(capacity: usize) -> EngineResult<Self> {
        if capacity == 0 || capacity > crate::config::MAX_OP_TABLE_SIZE {
            return Err(EngineError::InvalidConfig("op_table_size must be in 1..=65536"));
        }
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                entry: None,
            })
            .collect();
        Ok(Self {
            slots,
            free: TagPool::new(capacity),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live entries.
    pub fn live(&self) -> usize {
        self.capacity() - self.free.available()
    }

    pub fn is_full(&self) -> bool {
        self.free.available() == 0
    }

    /// Admits `desc`, failing fast when every slot is live.
    pub fn allocate(&mut self, desc: Descriptor, now: u64) -> EngineResult<OpTag> {
        let index = self.free.pop().ok_or(EngineError::TableFull {
            capacity: self.capacity(),
        })?;
        let slot = &mut self.slots[usize::from(index)];
        let tag = OpTag {
            index,
            generation: slot.generation,
        };
        slot.entry = Some(OpEntry {
            tag,
            desc,
            remaining: desc.len,
            in_flight: 0,
            error: None,
            started_at: now,
            state: OpState::Admitted,
        });
        Ok(tag)
    }

    pub fn lookup(&self, tag: OpTag) -> Option<&OpEntry> {
        let slot = self.slots.get(usize::from(tag.index))?;
        if slot.generation != tag.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn lookup_mut(&mut self, tag: OpTag) -> Option<&mut OpEntry> {
        let slot = self.slots.get_mut(usize::from(tag.index))?;
        if slot.generation != tag.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Lifecycle state of `tag`; dead tags report [`OpState::Retired`].
    pub fn state(&self, tag: OpTag) -> OpState {
        self.lookup(tag)
            .map_or(OpState::Retired, |entry| entry.state)
    }

    /// Records that `bytes` of `tag` were handed to the transport.
    pub fn mark_issued(&mut self, tag: OpTag, bytes: u32) -> bool {
        match self.lookup_mut(tag) {
            Some(entry) => {
                entry.in_flight = entry.in_flight.saturating_add(bytes);
                if entry.state == OpState::Admitted {
                    entry.state = OpState::InFlight;
                }
                true
            }
            None => false,
        }
    }

    /// Credits `bytes` to `tag`, or records `error`.
    ///
    /// Retires the entry once the whole descriptor is covered, on the first
    /// error, or when `bytes` exceeds what is outstanding.
    pub fn update(
        &mut self,
        tag: OpTag,
        bytes: u32,
        error: Option<ErrorKind>,
    ) -> Option<RetiredOp> {
        let entry = self.lookup_mut(tag)?;
        match error {
            Some(kind) => {
                entry.error.get_or_insert(kind);
                entry.state = OpState::Error;
            }
            None if bytes > entry.remaining => {
                entry.error.get_or_insert(ErrorKind::Overrun);
                entry.state = OpState::Error;
            }
            None => {
                entry.remaining -= bytes;
                entry.in_flight = entry.in_flight.saturating_sub(bytes);
                if entry.remaining == 0 {
                    entry.state = OpState::Complete;
                } else {
                    return None;
                }
            }
        }
        self.retire(tag)
    }

    /// Removes `tag` from the table and advances the slot generation.
    pub fn retire(&mut self, tag: OpTag) -> Option<RetiredOp> {
        let slot = self.slots.get_mut(usize::from(tag.index))?;
        if slot.generation != tag.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        if self.free.push(tag.index).is_err() {
            tracing::error!("slot {} released twice", tag.index);
        }
        Some(RetiredOp {
            tag,
            desc: entry.desc,
            error: entry.error,
            started_at: entry.started_at,
            bytes_done: entry.desc.len - entry.remaining,
        })
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &OpEntry> {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }
}
