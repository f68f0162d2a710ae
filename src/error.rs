//! Overflow error raised when the backlog cannot accept another item.

use thiserror::Error;

/// The backlog was full when an item had to be buffered.
///
/// This is a contract violation by the producer (posting faster than the
/// observer drains), not a transient condition, so the queue never retries.
/// The rejected item is handed back so the caller can decide what to do
/// with it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("maximum queue size ({capacity}) exceeded when posting: {item:?}")]
pub struct CapacityExceeded<T> {
    item: T,
    capacity: usize,
}

impl<T> CapacityExceeded<T> {
    pub(crate) fn new(item: T, capacity: usize) -> Self {
        Self { item, capacity }
    }

    /// The item that could not be buffered.
    #[inline]
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Take back ownership of the rejected item.
    #[inline]
    pub fn into_item(self) -> T {
        self.item
    }

    /// The configured backlog capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Short stable label for logs and metrics.
    ///
    /// ```
    /// use ph_live_queue::{Backlog, CapacityExceeded};
    ///
    /// let mut backlog = Backlog::new(1);
    /// backlog.try_enqueue(1u8).unwrap();
    /// let err: CapacityExceeded<u8> = backlog.try_enqueue(2).unwrap_err();
    /// assert_eq!(err.as_label(), "capacity_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        "capacity_exceeded"
    }
}
