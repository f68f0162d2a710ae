//! Readiness-gated event queue for a single observer.
//!
//! # Highlights
//! - At most one observer, bound to a readiness source (think foreground vs
//!   backgrounded host).
//! - Items posted while nobody is ready are kept in a bounded backlog and
//!   handed over once an observer can take them.
//! - Delivery always goes through a caller-supplied [`Scheduler`], never
//!   directly on the posting thread.
//! - Overflow fails fast with [`CapacityExceeded`].
//!
//! # Quick start
//! ```
//! use std::sync::{Arc, Mutex};
//! use ph_live_queue::{ImmediateScheduler, LiveQueue, Readiness, ReadinessCell};
//!
//! let queue = LiveQueue::new(ImmediateScheduler, 4);
//! let host = Arc::new(ReadinessCell::new(Readiness::Inactive));
//! let live = Arc::new(Mutex::new(Vec::new()));
//! let paused = Arc::new(Mutex::new(Vec::new()));
//!
//! queue.post("queued").unwrap();
//!
//! let (l, p) = (live.clone(), paused.clone());
//! queue.set_observer_with_batch(
//!     host.clone(),
//!     move |v| l.lock().unwrap().push(v),
//!     move |batch| p.lock().unwrap().push(batch),
//! );
//! assert_eq!(*paused.lock().unwrap(), vec![vec!["queued"]]);
//!
//! host.set(Readiness::Active);
//! queue.post("live").unwrap();
//! assert_eq!(*live.lock().unwrap(), vec!["live"]);
//! ```
//!
//! # No-std
//! The crate is `#![no_std]` and needs `alloc`. The `std` feature adds
//! [`ThreadScheduler`]. Tests require `std`.
//!
//! # Semantics
//! - Backlog capacity is fixed at construction; overflow hands the item back
//!   in the error and leaves the backlog untouched.
//! - Binding an observer whose source is already terminal is a no-op.
//! - Replacing an observer keeps the backlog for the new one;
//!   `clear_observer` and a terminal transition drop it.
//! - A delivery is skipped if its observer was cleared or replaced before
//!   the scheduler ran it.
//!
//! # Logging
//! Decisions are reported through `tracing` (`debug` for binding changes,
//! `trace` per item, `warn` on overflow). No subscriber is installed.
#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod backlog;
pub mod config;
pub mod error;
pub mod live_queue;
pub mod readiness;
pub mod scheduler;

pub use backlog::Backlog;
pub use config::{FlushMode, LiveQueueConfig};
pub use error::CapacityExceeded;
pub use live_queue::LiveQueue;
pub use readiness::{
    LifecycleEvent, Readiness, ReadinessCell, ReadinessListener, ReadinessSource, SubscriptionId,
};
#[cfg(feature = "std")]
pub use scheduler::ThreadScheduler;
pub use scheduler::{ImmediateScheduler, ManualScheduler, Scheduler, Work};
