//! Flow-control credit pool for posted and non-posted requests.
//!
//! The link advertises capacity in two currencies: header credits (one per
//! TLP) and data credits (one per 16 payload bytes). Each traffic class keeps
//! both counters packed into a single 64-bit word so that admission can debit
//! them together with one compare-and-swap. Starvation is back-pressure:
//! [`CreditPool::admit`] simply reports `false` and the caller retries on a
//! later cycle.

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU64, Ordering};

/// Payload bytes covered by one data credit.
pub const DATA_CREDIT_BYTES: u32 = 16;

/// Traffic class a request is accounted against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreditClass {
    /// Memory writes; no completion is returned.
    Posted,
    /// Memory reads; answered by one or more completions.
    NonPosted,
}

/// Header/data credit pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditCounts {
    pub header: u32,
    pub data: u32,
}

impl CreditCounts {
    pub const fn new(header: u32, data: u32) -> Self {
        Self { header, data }
    }

    /// Credits consumed by a single TLP carrying `payload_len` bytes.
    pub fn for_request(class: CreditClass, payload_len: u32) -> Self {
        match class {
            CreditClass::Posted => Self::new(1, data_credits_for(payload_len)),
            CreditClass::NonPosted => Self::new(1, 0),
        }
    }

    fn pack(self) -> u64 {
        (u64::from(self.header) << 32) | u64::from(self.data)
    }

    fn unpack(word: u64) -> Self {
        Self {
            header: (word >> 32) as u32,
            data: word as u32,
        }
    }
}

/// Number of data credits needed to carry `len` payload bytes.
#[inline]
pub fn data_credits_for(len: u32) -> u32 {
    len.div_ceil(DATA_CREDIT_BYTES)
}

/// Lock-free credit accounting for both traffic classes.
#[derive(Debug)]
pub struct CreditPool {
    posted: AtomicU64,
    non_posted: AtomicU64,
}

impl Default for CreditPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CreditPool {
    /// Creates an empty pool; credits arrive through [`CreditPool::replenish`].
    pub fn new() -> Self {
        Self::with_credits(CreditCounts::default(), CreditCounts::default())
    }

    /// Creates a pool pre-loaded with the given advertisement.
    pub fn with_credits(posted: CreditCounts, non_posted: CreditCounts) -> Self {
        Self {
            posted: AtomicU64::new(posted.pack()),
            non_posted: AtomicU64::new(non_posted.pack()),
        }
    }

    fn word(&self, class: CreditClass) -> &AtomicU64 {
        match class {
            CreditClass::Posted => &self.posted,
            CreditClass::NonPosted => &self.non_posted,
        }
    }

    /// Debits `header`/`data` credits from `class` iff both are available.
    ///
    /// Returns `false` without touching the pool when either currency is short.
    pub fn admit(&self, class: CreditClass, header: u32, data: u32) -> bool {
        let word = self.word(class);
        let mut current = word.load(Ordering::Acquire);
        loop {
            let avail = CreditCounts::unpack(current);
            if avail.header < header || avail.data < data {
                return false;
            }
            let next = CreditCounts::new(avail.header - header, avail.data - data).pack();
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Convenience wrapper over [`CreditPool::admit`] for a credit pair.
    pub fn admit_counts(&self, class: CreditClass, counts: CreditCounts) -> bool {
        self.admit(class, counts.header, counts.data)
    }

    /// Adds newly advertised credits to `class`. Saturates instead of wrapping.
    pub fn replenish(&self, class: CreditClass, header: u32, data: u32) {
        let word = self.word(class);
        let mut current = word.load(Ordering::Acquire);
        loop {
            let avail = CreditCounts::unpack(current);
            let next = CreditCounts::new(
                avail.header.saturating_add(header),
                avail.data.saturating_add(data),
            )
            .pack();
            match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Currently available credits for `class`.
    pub fn available(&self, class: CreditClass) -> CreditCounts {
        CreditCounts::unpack(self.word(class).load(Ordering::Acquire))
    }
}
