//! Byte-addressable memory windows used on both sides of the link.
//!
//! Host memory owned by the root complex and the card-side scratchpad RAM are
//! both modelled as a [`MemRegion`]: a contiguous, zero-initialised buffer
//! mapped at a base address. Native builds back large regions with anonymous
//! `mmap` pages; small regions, or targets without `mmap`, fall back to the
//! heap.

use crate::{TransportError, TransportResult};

/// Regions at or above this size are backed by an anonymous mapping.
const MMAP_THRESHOLD: usize = 64 * 1024;

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Native(memmap2::MmapMut),
    Heap(Vec<u8>),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Native(map) => &map[..],
            Backing::Heap(buf) => buf,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Native(map) => &mut map[..],
            Backing::Heap(buf) => buf,
        }
    }
}

/// Contiguous memory window `[base, base + len)`.
#[derive(Debug)]
pub struct MemRegion {
    base: u64,
    len: usize,
    backing: Backing,
}

impl MemRegion {
    /// Allocates a zeroed region of `len` bytes mapped at `base`.
    pub fn new(base: u64, len: usize) -> TransportResult<Self> {
        if len == 0 {
            return Err(TransportError::InvalidCapacity {
                requested: 0,
                minimum: 1,
            });
        }
        if base.checked_add(len as u64).is_none() {
            return Err(TransportError::OutOfRange {
                addr: base,
                len: len as u64,
            });
        }

        if len > isize::MAX as usize {
            return Err(TransportError::AllocationFailed { size: len });
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            if len >= MMAP_THRESHOLD {
                if let Some(backing) = Self::mmap_backed(len) {
                    return Ok(Self { base, len, backing });
                }
            }
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|_| TransportError::AllocationFailed { size: len })?;
        bytes.resize(len, 0);
        Ok(Self {
            base,
            len,
            backing: Backing::Heap(bytes),
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn mmap_backed(len: usize) -> Option<Backing> {
        // Anonymous mappings are zero-filled by the kernel.
        match memmap2::MmapOptions::new().len(len).map_anon() {
            Ok(map) => Some(Backing::Native(map)),
            Err(err) => {
                tracing::debug!("anonymous mapping of {len} bytes failed ({err}); using heap");
                None
            }
        }
    }

    /// First address covered by the region.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last address covered by the region.
    pub fn end(&self) -> u64 {
        self.base + self.len as u64
    }

    /// Returns true when `[addr, addr + len)` lies entirely inside the region.
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }

    fn offset_of(&self, addr: u64, len: usize) -> TransportResult<usize> {
        if !self.contains(addr, len as u64) {
            return Err(TransportError::OutOfRange {
                addr,
                len: len as u64,
            });
        }
        Ok((addr - self.base) as usize)
    }

    /// Borrows `len` bytes starting at `addr`.
    pub fn slice(&self, addr: u64, len: usize) -> TransportResult<&[u8]> {
        let offset = self.offset_of(addr, len)?;
        Ok(&self.backing.as_slice()[offset..offset + len])
    }

    /// Mutably borrows `len` bytes starting at `addr`.
    pub fn slice_mut(&mut self, addr: u64, len: usize) -> TransportResult<&mut [u8]> {
        let offset = self.offset_of(addr, len)?;
        Ok(&mut self.backing.as_mut_slice()[offset..offset + len])
    }

    /// Copies `buf.len()` bytes starting at `addr` into `buf`.
    pub fn read(&self, addr: u64, buf: &mut [u8]) -> TransportResult<()> {
        buf.copy_from_slice(self.slice(addr, buf.len())?);
        Ok(())
    }

    /// Returns an owned copy of `len` bytes starting at `addr`.
    pub fn read_vec(&self, addr: u64, len: usize) -> TransportResult<Vec<u8>> {
        Ok(self.slice(addr, len)?.to_vec())
    }

    /// Writes `data` starting at `addr`.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> TransportResult<()> {
        self.slice_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Fills `len` bytes starting at `addr` with `value`.
    pub fn fill(&mut self, addr: u64, len: usize, value: u8) -> TransportResult<()> {
        self.slice_mut(addr, len)?.fill(value);
        Ok(())
    }

    /// View the full region as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        self.backing.as_slice()
    }

    /// View the full region as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.backing.as_mut_slice()
    }
}
