//! Construction-time settings for [`crate::LiveQueue`].

use core::num::NonZeroUsize;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// How the backlog is handed over when a bound observer becomes active.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FlushMode {
    /// Deliver each backlogged item on its own through the live sink.
    #[default]
    PerItem,
    /// Deliver the whole backlog as one batch to the batch sink when the
    /// observer has one; per item otherwise.
    Batch,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LiveQueueConfig {
    /// Most items the backlog holds before `post` fails.
    pub capacity: NonZeroUsize,
    pub flush_mode: FlushMode,
}

impl LiveQueueConfig {
    /// Config with the given capacity and default flush mode.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let Some(capacity) = NonZeroUsize::new(capacity) else {
            panic!("queue capacity must be positive");
        };
        Self {
            capacity,
            flush_mode: FlushMode::default(),
        }
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }
}

impl Default for LiveQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            flush_mode: FlushMode::default(),
        }
    }
}
