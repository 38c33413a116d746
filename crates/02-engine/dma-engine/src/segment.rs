//! Splits a descriptor's host range into bus-sized requests.

use crate::op_table::OpTag;

/// One bus request worth of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Host address of the first byte.
    pub addr: u64,
    pub len: u32,
    /// Offset of `addr` from the descriptor's start.
    pub offset: u32,
    pub tag: OpTag,
}

/// Lazy chunk generator for `[addr, addr + len)`.
///
/// Every chunk ends at the next multiple of `bound` (or of `boundary`, or at
/// the end of the range, whichever comes first), so only the first and last
/// chunks can be short and no chunk straddles `boundary`.
#[derive(Clone, Debug)]
pub struct Segmenter {
    addr: u64,
    end: u64,
    offset: u32,
    bound: u64,
    boundary: u64,
    tag: OpTag,
}

impl Segmenter {
    /// `bound` and `boundary` must be powers of two; `addr + len` must not overflow.
    pub fn new(addr: u64, len: u32, bound: u32, boundary: u32, tag: OpTag) -> Self {
        debug_assert!(bound.is_power_of_two() && boundary.is_power_of_two());
        Self {
            addr,
            end: addr + u64::from(len),
            offset: 0,
            bound: u64::from(bound),
            boundary: u64::from(boundary),
            tag,
        }
    }

    pub fn tag(&self) -> OpTag {
        self.tag
    }

    /// Bytes not yet emitted.
    pub fn remaining(&self) -> u64 {
        self.end - self.addr
    }

    pub fn is_done(&self) -> bool {
        self.addr == self.end
    }
}

impl Iterator for Segmenter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.is_done() {
            return None;
        }
        let to_bound = self.bound - (self.addr & (self.bound - 1));
        let to_boundary = self.boundary - (self.addr & (self.boundary - 1));
        let len = self.remaining().min(to_bound).min(to_boundary) as u32;
        let chunk = Chunk {
            addr: self.addr,
            len,
            offset: self.offset,
            tag: self.tag,
        };
        self.addr += u64::from(len);
        self.offset += len;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.is_done() {
            return (0, Some(0));
        }
        let lower = self.remaining().div_ceil(self.bound) as usize;
        (lower, Some(lower + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAG: OpTag = OpTag {
        index: 3,
        generation: 1,
    };

    fn lens(addr: u64, len: u32, bound: u32) -> Vec<u32> {
        Segmenter::new(addr, len, bound, 4096, TAG)
            .map(|c| c.len)
            .collect()
    }

    #[test]
    fn zero_length_yields_nothing() {
        assert_eq!(Segmenter::new(0x1000, 0, 256, 4096, TAG).count(), 0);
    }

    #[test]
    fn aligned_transfer_uses_full_bursts() {
        assert_eq!(lens(0x1000, 1024, 256), vec![256; 4]);
    }

    #[test]
    fn unaligned_start_is_short_then_aligned() {
        assert_eq!(lens(0x1010, 600, 256), vec![240, 256, 104]);
    }

    #[test]
    fn never_straddles_page_boundary() {
        let chunks: Vec<Chunk> = Segmenter::new(0xFF0, 64, 4096, 4096, TAG).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].addr, chunks[0].len), (0xFF0, 16));
        assert_eq!((chunks[1].addr, chunks[1].len, chunks[1].offset), (0x1000, 48, 16));
        assert!(chunks.iter().all(|c| c.tag == TAG));
    }

    #[test]
    fn single_byte() {
        assert_eq!(lens(0x1FFF, 1, 128), vec![1]);
    }
}
