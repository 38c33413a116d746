//! Cyclic strided address generator for block-mode runs.
//!
//! Beat `i` of a run addresses `base + ((offset + i * stride) & mask)`, so a
//! power-of-two window is swept with a fixed stride and wraps around without
//! ever leaving it.

use serde::{Deserialize, Serialize};

use crate::{BenchError, BenchResult};

/// One address window of a block run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub base: u64,
    /// Starting offset; masked before the first beat.
    pub offset: u64,
    /// Window size minus one; must be `2^k - 1`.
    pub mask: u64,
    pub stride: u64,
}

impl SequencerConfig {
    pub fn new(base: u64, offset: u64, mask: u64, stride: u64) -> Self {
        Self {
            base,
            offset,
            mask,
            stride,
        }
    }

    pub fn validate(&self) -> BenchResult<()> {
        if self.mask & self.mask.wrapping_add(1) != 0 {
            return Err(BenchError::InvalidConfig("offset mask must be 2^k - 1"));
        }
        Ok(())
    }

    /// Address of beat `i`, computed directly.
    pub fn address_of(&self, i: u64) -> u64 {
        let offset = self.offset.wrapping_add(i.wrapping_mul(self.stride)) & self.mask;
        self.base.wrapping_add(offset)
    }
}

/// Emits `count` addresses, then stops.
#[derive(Clone, Debug)]
pub struct BlockSequencer {
    config: SequencerConfig,
    offset: u64,
    remaining: u64,
}

impl BlockSequencer {
    pub fn new(config: SequencerConfig, count: u64) -> BenchResult<Self> {
        config.validate()?;
        Ok(Self {
            offset: config.offset & config.mask,
            remaining: count,
            config,
        })
    }

    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Offset of the next beat.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Beats left to emit.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Rewinds to the configured offset with a fresh beat count.
    pub fn restart(&mut self, count: u64) {
        self.offset = self.config.offset & self.config.mask;
        self.remaining = count;
    }
}

impl Iterator for BlockSequencer {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        let addr = self.config.base.wrapping_add(self.offset);
        self.offset = self.offset.wrapping_add(self.config.stride) & self.config.mask;
        self.remaining -= 1;
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}
