//! Fixed-capacity FIFO holding items that are waiting for an observer.
//!
//! # Overview
//! - Capacity is fixed at construction and never grows.
//! - Enqueue is all-or-nothing: on overflow the item is handed back inside
//!   [`CapacityExceeded`] and the buffer is left untouched.
//! - Items leave in the order they entered, either all at once
//!   ([`Backlog::drain_all`]) or by being discarded ([`Backlog::clear`]).
//!
//! The backlog itself is not synchronised; [`crate::LiveQueue`] keeps it
//! behind its lock.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::error::CapacityExceeded;

/// Bounded FIFO of pending items.
#[derive(Debug)]
pub struct Backlog<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Backlog<T> {
    /// Create an empty backlog able to hold `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "backlog capacity must be positive");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Append `item`, or hand it back if the backlog is full.
    pub fn try_enqueue(&mut self, item: T) -> Result<(), CapacityExceeded<T>> {
        if self.is_full() {
            return Err(CapacityExceeded::new(item, self.capacity));
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove every item, oldest first.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Drop every item.
    #[inline]
    pub fn clear(&mut self) {
        self.items.clear();
    }
}
