//! Free-list of operation-table slot indices.
//!
//! A fixed ring of `capacity` entries holding the indices that are currently
//! free. `head` and `tail` run over `0..2 * capacity` and wrap explicitly;
//! `head - tail` modulo that span is the number of free slots, so a full
//! ring and an empty ring never alias for any capacity.

pub(crate) struct TagPool {
    entries: Box<[u16]>,
    head: u32,
    tail: u32,
}

impl TagPool {
    /// Creates a pool holding every index in `0..capacity`.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0 && capacity <= 1 << 16);
        let mut pool = Self {
            entries: vec![0u16; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
        };
        pool.fill_sequential(0);
        pool
    }

    fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    fn span(&self) -> u32 {
        2 * self.capacity()
    }

    fn advance(&self, cursor: u32) -> u32 {
        let next = cursor + 1;
        if next == self.span() {
            0
        } else {
            next
        }
    }

    fn slot(&self, cursor: u32) -> usize {
        (cursor % self.capacity()) as usize
    }

    /// Fills the ring with `0..capacity` in order, oldest at `tail`.
    fn fill_sequential(&mut self, tail: u32) {
        self.tail = tail;
        let mut cursor = tail;
        for i in 0..self.entries.len() {
            let slot = self.slot(cursor);
            self.entries[slot] = i as u16;
            cursor = self.advance(cursor);
        }
        self.head = cursor;
    }

    /// Number of indices available for allocation.
    pub(crate) fn available(&self) -> usize {
        ((self.head + self.span() - self.tail) % self.span()) as usize
    }

    /// Takes the oldest free index.
    pub(crate) fn pop(&mut self) -> Option<u16> {
        if self.tail == self.head {
            return None;
        }
        let value = self.entries[self.slot(self.tail)];
        self.tail = self.advance(self.tail);
        Some(value)
    }

    /// Returns an index to the pool. Fails when the ring is already full,
    /// which means the index was released twice.
    pub(crate) fn push(&mut self, value: u16) -> Result<(), u16> {
        if self.available() >= self.entries.len() {
            return Err(value);
        }
        let slot = self.slot(self.head);
        self.entries[slot] = value;
        self.head = self.advance(self.head);
        Ok(())
    }
}
