//! Execution seam used for every delivery.
//!
//! The queue never calls an observer on the posting thread directly; it
//! hands a unit of [`Work`] to a [`Scheduler`]. Schedulers must run work in
//! submission order. Whether they run it now, later, or on another thread is
//! up to them.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// A zero-argument unit of work.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted work, in submission order.
pub trait Scheduler: Send + Sync {
    fn submit(&self, work: Work);
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    #[inline]
    fn submit(&self, work: Work) {
        (**self).submit(work)
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
    #[inline]
    fn submit(&self, work: Work) {
        (**self).submit(work)
    }
}

/// Runs work synchronously on the submitting thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    #[inline]
    fn submit(&self, work: Work) {
        work()
    }
}

/// Holds work until explicitly told to run it.
///
/// Useful for deterministic tests and for hosts with their own main loop.
#[derive(Default)]
pub struct ManualScheduler {
    pending: spin::Mutex<VecDeque<Work>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Run the oldest pending unit of work, if any.
    pub fn run_next(&self) -> bool {
        // Pop under the lock, run without it: work may submit more work.
        let next = self.pending.lock().pop_front();
        match next {
            Some(work) => {
                work();
                true
            }
            None => false,
        }
    }

    /// Run pending work until none is left, including work submitted while
    /// running. Returns how many units ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn submit(&self, work: Work) {
        self.pending.lock().push_back(work);
    }
}

#[cfg(feature = "std")]
pub use worker::ThreadScheduler;

#[cfg(feature = "std")]
mod worker {
    use std::mem;
    use std::string::String;
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};

    use tracing::warn;

    use super::{Scheduler, Work};

    /// Runs work on one dedicated worker thread, in submission order.
    ///
    /// Dropping the scheduler lets the worker finish what was already
    /// submitted and joins it.
    pub struct ThreadScheduler {
        sender: mpsc::Sender<Work>,
        worker: Option<JoinHandle<()>>,
    }

    impl ThreadScheduler {
        /// Spawn an anonymous worker thread.
        pub fn new() -> std::io::Result<Self> {
            Self::spawn(thread::Builder::new())
        }

        /// Spawn a worker thread with the given name.
        pub fn with_name(name: impl Into<String>) -> std::io::Result<Self> {
            Self::spawn(thread::Builder::new().name(name.into()))
        }

        fn spawn(builder: thread::Builder) -> std::io::Result<Self> {
            let (sender, receiver) = mpsc::channel::<Work>();
            let worker = builder.spawn(move || {
                for work in receiver {
                    work();
                }
            })?;
            Ok(Self {
                sender,
                worker: Some(worker),
            })
        }
    }

    impl Scheduler for ThreadScheduler {
        fn submit(&self, work: Work) {
            if self.sender.send(work).is_err() {
                warn!("worker thread is gone; dropping submitted work");
            }
        }
    }

    impl Drop for ThreadScheduler {
        fn drop(&mut self) {
            // Swapping in a disconnected sender closes the channel so the
            // worker loop ends once it has drained.
            let (closed, _) = mpsc::channel();
            drop(mem::replace(&mut self.sender, closed));
            if let Some(worker) = self.worker.take() {
                // Dropped from a unit of work: the worker exits on its own.
                if worker.thread().id() == thread::current().id() {
                    return;
                }
                if worker.join().is_err() {
                    warn!("worker thread panicked");
                }
            }
        }
    }
}
