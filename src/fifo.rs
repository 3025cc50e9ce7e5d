//! Bounded register write queue
//!
//! A fixed-capacity ring buffer between the tick/dispatch side (producer) and
//! acquire (consumer). Both sides run on the same thread for one chip
//! instance, so no locking is involved.
//!
//! One slot is always kept free to tell "full" from "empty", so a queue built
//! with capacity `n` holds `n - 1` writes. A push on a full queue is dropped
//! and counted; queued writes are never reordered or overwritten.

use crate::registers::RegisterWrite;

/// Bounded FIFO of pending register writes
#[derive(Debug, Clone)]
pub struct WriteFifo {
    /// Storage (length is a power of two)
    slots: Vec<RegisterWrite>,
    /// Next slot to read
    read_pos: usize,
    /// Next slot to write
    write_pos: usize,
    /// Capacity mask for fast modulo: `pos & mask == pos % capacity`
    mask: usize,
    /// Writes rejected because the queue was full
    dropped: u64,
    /// Set while a run of overflows is in progress (log once per burst)
    overflowing: bool,
}

impl WriteFifo {
    /// Create a new queue
    ///
    /// Capacity is rounded up to the next power of two (minimum 2). One slot
    /// is reserved, so `capacity() - 1` writes fit.
    pub fn new(requested_capacity: usize) -> Self {
        let capacity = requested_capacity.max(2).next_power_of_two();
        Self {
            slots: vec![RegisterWrite::default(); capacity],
            read_pos: 0,
            write_pos: 0,
            mask: capacity - 1,
            dropped: 0,
            overflowing: false,
        }
    }

    /// Total slot count, including the reserved one
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of queued writes
    #[inline]
    pub fn len(&self) -> usize {
        self.write_pos.wrapping_sub(self.read_pos) & self.mask
    }

    /// True when nothing is queued
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// True when a push would be rejected
    #[inline]
    pub fn is_full(&self) -> bool {
        ((self.write_pos + 1) & self.mask) == self.read_pos
    }

    /// Append a write
    ///
    /// Returns `false` (and drops the write) when the queue is full.
    pub fn push(&mut self, write: RegisterWrite) -> bool {
        if self.is_full() {
            self.dropped += 1;
            if !self.overflowing {
                self.overflowing = true;
                log::warn!(
                    "register write queue full, dropping write {:#x}={:#x} ({} dropped so far)",
                    write.addr,
                    write.val,
                    self.dropped
                );
            }
            return false;
        }
        self.overflowing = false;
        self.slots[self.write_pos] = write;
        self.write_pos = (self.write_pos + 1) & self.mask;
        true
    }

    /// Oldest queued write, without removing it
    #[inline]
    pub fn front(&self) -> Option<&RegisterWrite> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.read_pos])
        }
    }

    /// Remove and return the oldest queued write
    #[inline]
    pub fn pop(&mut self) -> Option<RegisterWrite> {
        if self.is_empty() {
            return None;
        }
        let write = self.slots[self.read_pos];
        self.read_pos = (self.read_pos + 1) & self.mask;
        Some(write)
    }

    /// Discard every queued write
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
        self.overflowing = false;
    }

    /// Number of writes dropped on overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for WriteFifo {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_FIFO_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(addr: u32, val: u16) -> RegisterWrite {
        RegisterWrite::new(addr, val)
    }

    #[test]
    fn test_capacity_rounds_up() {
        let fifo = WriteFifo::new(5);
        assert_eq!(fifo.capacity(), 8);
        let fifo = WriteFifo::new(0);
        assert_eq!(fifo.capacity(), 2);
    }

    #[test]
    fn test_pop_order_matches_push_order() {
        let mut fifo = WriteFifo::new(16);
        for i in 0..10 {
            assert!(fifo.push(w(i, i as u16 * 3)));
        }
        assert_eq!(fifo.len(), 10);
        for i in 0..10 {
            assert_eq!(fifo.pop(), Some(w(i, i as u16 * 3)));
        }
        assert!(fifo.pop().is_none());
    }

    #[test]
    fn test_one_slot_reserved() {
        let mut fifo = WriteFifo::new(4);
        assert!(fifo.push(w(0, 0)));
        assert!(fifo.push(w(1, 1)));
        assert!(fifo.push(w(2, 2)));
        assert!(fifo.is_full());
        assert!(!fifo.push(w(3, 3)));
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.dropped(), 1);
    }

    #[test]
    fn test_overflow_keeps_existing_order() {
        let mut fifo = WriteFifo::new(8);
        for i in 0..20 {
            fifo.push(w(i, 0));
        }
        let popped: Vec<u32> = std::iter::from_fn(|| fifo.pop()).map(|x| x.addr).collect();
        assert_eq!(popped, (0..7).collect::<Vec<_>>());
        assert_eq!(fifo.dropped(), 13);
    }

    #[test]
    fn test_wraparound() {
        let mut fifo = WriteFifo::new(4);
        for round in 0..10u32 {
            assert!(fifo.push(w(round, 1)));
            assert!(fifo.push(w(round + 100, 2)));
            assert_eq!(fifo.front().map(|x| x.addr), Some(round));
            assert_eq!(fifo.pop().map(|x| x.addr), Some(round));
            assert_eq!(fifo.pop().map(|x| x.addr), Some(round + 100));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut fifo = WriteFifo::new(8);
        fifo.push(w(1, 1));
        fifo.push(w(2, 2));
        fifo.clear();
        assert!(fifo.is_empty());
        assert!(fifo.front().is_none());
    }
}
