//! Readiness-gated single-observer queue.
//!
//! # Overview
//! - At most one observer is bound at a time, tied to a [`ReadinessSource`].
//! - While the observer is active, posted items are delivered one by one
//!   through the [`Scheduler`].
//! - While it is inactive, or while nothing is bound, items accumulate in a
//!   bounded [`Backlog`]; overflow fails the `post` call.
//! - The backlog is flushed per item when the observer becomes active, or as
//!   a single batch when an inactive observer with a batch sink is bound.
//!
//! # Concurrency
//! Backlog and binding live behind one lock. Decisions are made under it and
//! recorded in an outbox; the outbox is handed to the scheduler after the
//! lock is released, by one caller at a time, so submission order matches
//! decision order and observers may re-enter the queue from their callbacks
//! even with a synchronous scheduler.
//!
//! Every binding carries a generation number. Deliveries capture it when
//! they are decided and are skipped at execution time if the binding has
//! since been cleared or replaced.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use tracing::{debug, trace, warn};

use crate::backlog::Backlog;
use crate::config::{FlushMode, LiveQueueConfig};
use crate::error::CapacityExceeded;
use crate::readiness::{Readiness, ReadinessSource, SubscriptionId};
use crate::scheduler::Scheduler;

type LiveSink<T> = Arc<dyn Fn(T) + Send + Sync>;
type BatchSink<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;

enum Delivery<T> {
    Live(T),
    Batch(Vec<T>),
}

struct Pending<T> {
    generation: u64,
    delivery: Delivery<T>,
}

struct Binding<T> {
    generation: u64,
    source: Box<dyn ReadinessSource>,
    subscription: SubscriptionId,
    readiness: Readiness,
    on_live: LiveSink<T>,
    on_paused: Option<BatchSink<T>>,
    drop_inactive: bool,
}

impl<T> Binding<T> {
    fn release(self) {
        self.source.unsubscribe(self.subscription);
    }
}

struct State<T> {
    backlog: Backlog<T>,
    binding: Option<Binding<T>>,
    last_generation: u64,
    outbox: VecDeque<Pending<T>>,
    pumping: bool,
}

impl<T> State<T> {
    fn schedule(&mut self, generation: u64, delivery: Delivery<T>) {
        self.outbox.push_back(Pending {
            generation,
            delivery,
        });
    }

    /// Backlog handover for an observer that just became (or was bound) active.
    fn flush_active(&mut self, generation: u64, mode: FlushMode) {
        if self.backlog.is_empty() {
            return;
        }
        let has_batch = self
            .binding
            .as_ref()
            .is_some_and(|binding| binding.on_paused.is_some());
        let items = self.backlog.drain_all();
        trace!(count = items.len(), ?mode, "flushing backlog to active observer");

        if mode == FlushMode::Batch && has_batch {
            self.schedule(generation, Delivery::Batch(items));
        } else {
            for item in items {
                self.schedule(generation, Delivery::Live(item));
            }
        }
    }

    /// Backlog handover for an inactive observer with a batch sink.
    fn flush_batch(&mut self, generation: u64) {
        if self.backlog.is_empty() {
            return;
        }
        let items = self.backlog.drain_all();
        trace!(count = items.len(), "flushing backlog as one batch");
        self.schedule(generation, Delivery::Batch(items));
    }

    fn clear(&mut self) {
        if let Some(binding) = self.binding.take() {
            binding.release();
        }
        self.backlog.clear();
    }

    /// True if the caller must now hand the outbox to the scheduler.
    fn claim_pump(&mut self) -> bool {
        if self.pumping || self.outbox.is_empty() {
            return false;
        }
        self.pumping = true;
        true
    }
}

struct Shared<T> {
    scheduler: Box<dyn Scheduler>,
    flush_mode: FlushMode,
    state: spin::Mutex<State<T>>,
}

/// Releases the pump if a unit of work unwinds while the outbox is being
/// handed over, so the next caller can resume it.
struct PumpGuard<'a, T> {
    state: &'a spin::Mutex<State<T>>,
    armed: bool,
}

impl<T> Drop for PumpGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().pumping = false;
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    fn pump(self: &Arc<Self>) {
        let mut guard = PumpGuard {
            state: &self.state,
            armed: true,
        };
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.outbox.pop_front() {
                    Some(next) => next,
                    None => {
                        // Released together with the empty check: a post
                        // racing this return must see the pump as free.
                        state.pumping = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            let shared = Arc::downgrade(self);
            self.scheduler.submit(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.deliver(next);
                }
            }));
        }
    }

    fn deliver(&self, pending: Pending<T>) {
        let Pending {
            generation,
            delivery,
        } = pending;
        let (on_live, on_paused) = {
            let state = self.state.lock();
            match state.binding.as_ref() {
                Some(binding) if binding.generation == generation => {
                    (binding.on_live.clone(), binding.on_paused.clone())
                }
                _ => {
                    trace!(generation, "observer changed before delivery; skipping");
                    return;
                }
            }
        };

        match delivery {
            Delivery::Live(item) => on_live(item),
            Delivery::Batch(items) => {
                if let Some(on_paused) = on_paused {
                    on_paused(items);
                }
            }
        }
    }

    fn attach(
        self: &Arc<Self>,
        source: Box<dyn ReadinessSource>,
        on_live: LiveSink<T>,
        on_paused: Option<BatchSink<T>>,
        drop_inactive: bool,
    ) {
        let pump = {
            let mut state = self.state.lock();
            if source.current().is_terminal() {
                debug!("readiness source already terminated; observer ignored");
                return;
            }

            let generation = state.last_generation.wrapping_add(1);
            state.last_generation = generation;
            let weak = Arc::downgrade(self);
            let subscription = source.subscribe(Arc::new(move |readiness: Readiness| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_readiness(generation, readiness);
                }
            }));

            // Re-read after subscribing so a transition in between is not lost.
            let readiness = source.current();
            if readiness.is_terminal() {
                source.unsubscribe(subscription);
                debug!("readiness source terminated while binding; observer ignored");
                return;
            }

            if let Some(previous) = state.binding.take() {
                previous.release();
            }

            let has_batch = on_paused.is_some();
            state.binding = Some(Binding {
                generation,
                source,
                subscription,
                readiness,
                on_live,
                on_paused,
                drop_inactive,
            });
            debug!(
                generation,
                ?readiness,
                has_batch,
                drop_inactive,
                backlog = state.backlog.len(),
                "observer bound"
            );

            match readiness {
                Readiness::Active => state.flush_active(generation, self.flush_mode),
                Readiness::Inactive if has_batch => state.flush_batch(generation),
                _ => {}
            }
            state.claim_pump()
        };

        if pump {
            self.pump();
        }
    }

    /// `notified` only wakes the binding up; the source's current readiness,
    /// read under the lock, is what gets applied. Racing `set` calls can
    /// deliver their notifications out of order.
    fn on_readiness(self: &Arc<Self>, generation: u64, notified: Readiness) {
        let pump = {
            let mut state = self.state.lock();
            let Some(binding) = state
                .binding
                .as_mut()
                .filter(|binding| binding.generation == generation)
            else {
                trace!(generation, ?notified, "readiness change for a stale observer");
                return;
            };
            let readiness = binding.source.current();
            if readiness != notified {
                trace!(generation, ?notified, ?readiness, "stale readiness notification");
            }
            binding.readiness = readiness;

            match readiness {
                Readiness::Active => state.flush_active(generation, self.flush_mode),
                Readiness::Inactive => {}
                Readiness::Terminal => {
                    debug!(
                        generation,
                        dropped = state.backlog.len(),
                        "readiness source terminated; observer cleared"
                    );
                    state.clear();
                }
            }
            state.claim_pump()
        };

        if pump {
            self.pump();
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Some(binding) = self.state.get_mut().binding.take() {
            binding.release();
        }
    }
}

/// Bounded queue that delivers to at most one observer, gated by that
/// observer's readiness.
///
/// Cloning yields another handle to the same queue. When the last handle is
/// dropped the bound observer is unsubscribed and pending deliveries become
/// no-ops.
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use ph_live_queue::{ImmediateScheduler, LiveQueue, Readiness, ReadinessCell};
///
/// let queue = LiveQueue::new(ImmediateScheduler, 8);
/// let host = Arc::new(ReadinessCell::new(Readiness::Inactive));
/// let seen = Arc::new(Mutex::new(Vec::new()));
///
/// let sink = seen.clone();
/// queue.set_observer(host.clone(), move |v: u32| sink.lock().unwrap().push(v));
///
/// queue.post(1).unwrap();
/// queue.post(2).unwrap();
/// assert!(seen.lock().unwrap().is_empty());
///
/// host.set(Readiness::Active);
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// ```
pub struct LiveQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for LiveQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> LiveQueue<T> {
    /// Queue holding at most `capacity` undelivered items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new<S: Scheduler + 'static>(scheduler: S, capacity: usize) -> Self {
        Self::with_config(scheduler, LiveQueueConfig::new(capacity))
    }

    pub fn with_config<S: Scheduler + 'static>(scheduler: S, config: LiveQueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                scheduler: Box::new(scheduler),
                flush_mode: config.flush_mode,
                state: spin::Mutex::new(State {
                    backlog: Backlog::new(config.capacity.get()),
                    binding: None,
                    last_generation: 0,
                    outbox: VecDeque::new(),
                    pumping: false,
                }),
            }),
        }
    }

    /// Deliver `item` now if the observer is active, otherwise buffer it.
    ///
    /// Observers bound with [`LiveQueue::set_observer_ignoring_inactive`]
    /// discard items while inactive instead.
    ///
    /// # Errors
    /// Returns [`CapacityExceeded`], carrying `item`, when it has to be
    /// buffered and the backlog is full. The backlog is left unchanged.
    pub fn post(&self, item: T) -> Result<(), CapacityExceeded<T>> {
        let pump = {
            let mut state = self.shared.state.lock();
            let mode = state
                .binding
                .as_ref()
                .map(|binding| (binding.generation, binding.readiness, binding.drop_inactive));

            match mode {
                Some((generation, Readiness::Active, _)) => {
                    state.schedule(generation, Delivery::Live(item));
                }
                Some((generation, _, true)) => {
                    trace!(generation, "observer inactive; item dropped");
                    return Ok(());
                }
                _ => {
                    if let Err(err) = state.backlog.try_enqueue(item) {
                        warn!(capacity = err.capacity(), "backlog full; item rejected");
                        return Err(err);
                    }
                    trace!(backlog = state.backlog.len(), "item buffered");
                }
            }
            state.claim_pump()
        };

        if pump {
            self.shared.pump();
        }
        Ok(())
    }

    /// Bind an observer with only a live sink, replacing any previous one.
    ///
    /// While `source` is inactive, items accumulate; they reach `on_live`
    /// once it becomes active. The call is ignored if `source` is already
    /// terminal.
    pub fn set_observer<R, F>(&self, source: R, on_live: F)
    where
        R: ReadinessSource + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.shared
            .attach(Box::new(source), Arc::new(on_live), None, false);
    }

    /// Bind an observer with a live sink and a batch sink, replacing any
    /// previous one.
    ///
    /// If `source` is inactive at bind time, the current backlog (if any) is
    /// handed to `on_paused` as one batch.
    pub fn set_observer_with_batch<R, F, B>(&self, source: R, on_live: F, on_paused: B)
    where
        R: ReadinessSource + 'static,
        F: Fn(T) + Send + Sync + 'static,
        B: Fn(Vec<T>) + Send + Sync + 'static,
    {
        self.shared.attach(
            Box::new(source),
            Arc::new(on_live),
            Some(Arc::new(on_paused) as BatchSink<T>),
            false,
        );
    }

    /// Bind an observer that discards items posted while it is inactive.
    pub fn set_observer_ignoring_inactive<R, F>(&self, source: R, on_live: F)
    where
        R: ReadinessSource + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.shared
            .attach(Box::new(source), Arc::new(on_live), None, true);
    }

    /// Unbind the observer and drop everything buffered.
    pub fn clear_observer(&self) {
        let mut state = self.shared.state.lock();
        debug!(
            bound = state.binding.is_some(),
            dropped = state.backlog.len(),
            "observer cleared"
        );
        state.clear();
    }
}

impl<T> LiveQueue<T> {
    pub fn has_observer(&self) -> bool {
        self.shared.state.lock().binding.is_some()
    }

    pub fn has_active_observer(&self) -> bool {
        self.shared
            .state
            .lock()
            .binding
            .as_ref()
            .is_some_and(|binding| binding.readiness.is_active())
    }

    /// Items currently buffered.
    pub fn backlog_len(&self) -> usize {
        self.shared.state.lock().backlog.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().backlog.capacity()
    }
}

impl<T> fmt::Debug for LiveQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("LiveQueue")
            .field("capacity", &state.backlog.capacity())
            .field("backlog", &state.backlog.len())
            .field("readiness", &state.binding.as_ref().map(|b| b.readiness))
            .field("flush_mode", &self.shared.flush_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::LiveQueue;
    use crate::config::{FlushMode, LiveQueueConfig};
    use crate::readiness::{
        Readiness, ReadinessCell, ReadinessListener, ReadinessSource, SubscriptionId,
    };
    use crate::scheduler::{ImmediateScheduler, ManualScheduler};
    use std::sync::{Arc, Mutex};
    use std::vec;
    use std::vec::Vec;

    type Log<T> = Arc<Mutex<Vec<T>>>;

    fn log<T>() -> Log<T> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn pusher<T: Send + 'static>(log: &Log<T>) -> impl Fn(T) + Send + Sync + 'static {
        let log = log.clone();
        move |v| log.lock().unwrap().push(v)
    }

    /// Source whose notifications are sent by hand, independent of its
    /// reported readiness.
    struct ScriptedSource {
        current: Mutex<Readiness>,
        listener: Mutex<Option<ReadinessListener>>,
    }

    impl ScriptedSource {
        fn new(current: Readiness) -> Self {
            Self {
                current: Mutex::new(current),
                listener: Mutex::new(None),
            }
        }

        fn report(&self, current: Readiness) {
            *self.current.lock().unwrap() = current;
        }

        fn notify(&self, value: Readiness) {
            let listener = self.listener.lock().unwrap().clone();
            if let Some(listener) = listener {
                listener(value);
            }
        }
    }

    impl ReadinessSource for ScriptedSource {
        fn current(&self) -> Readiness {
            *self.current.lock().unwrap()
        }

        fn subscribe(&self, listener: ReadinessListener) -> SubscriptionId {
            *self.listener.lock().unwrap() = Some(listener);
            SubscriptionId::new(1)
        }

        fn unsubscribe(&self, _id: SubscriptionId) {
            self.listener.lock().unwrap().take();
        }
    }

    #[test]
    fn out_of_order_notifications_follow_current_readiness() {
        let queue = LiveQueue::new(ImmediateScheduler, 4);
        let host = Arc::new(ScriptedSource::new(Readiness::Inactive));
        let seen = log();
        queue.set_observer(host.clone(), pusher(&seen));
        queue.post(1).unwrap();

        // A late `Active` arrives after the host went back to inactive.
        host.notify(Readiness::Active);
        assert!(!queue.has_active_observer());
        assert_eq!(queue.backlog_len(), 1);
        queue.post(2).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        // A late `Inactive` arrives after the host became active.
        host.report(Readiness::Active);
        host.notify(Readiness::Inactive);
        assert!(queue.has_active_observer());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn reentrant_post_from_live_sink_keeps_order() {
        let queue = LiveQueue::new(ImmediateScheduler, 4);
        let host = Arc::new(ReadinessCell::new(Readiness::Active));
        let seen = log();

        let (inner, sink) = (queue.clone(), seen.clone());
        queue.set_observer(host, move |v: u32| {
            sink.lock().unwrap().push(v);
            if v < 3 {
                inner.post(v + 10).unwrap();
            }
        });

        queue.post(1).unwrap();
        queue.post(2).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 11, 2, 12]);
    }

    #[test]
    fn replacing_observer_skips_deliveries_scheduled_for_the_old_one() {
        let scheduler = Arc::new(ManualScheduler::new());
        let queue = LiveQueue::new(scheduler.clone(), 4);
        let host = Arc::new(ReadinessCell::new(Readiness::Active));
        let (first, second) = (log(), log());

        queue.set_observer(host.clone(), pusher(&first));
        queue.post("a").unwrap();
        queue.set_observer(host.clone(), pusher(&second));
        queue.post("b").unwrap();
        scheduler.run_all();

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn replacing_observer_unsubscribes_the_old_source() {
        let queue = LiveQueue::<u8>::new(ImmediateScheduler, 4);
        let first = Arc::new(ReadinessCell::default());
        let second = Arc::new(ReadinessCell::default());

        queue.set_observer(first.clone(), |_| {});
        assert_eq!(first.listener_count(), 1);
        queue.set_observer(second.clone(), |_| {});

        assert_eq!(first.listener_count(), 0);
        assert_eq!(second.listener_count(), 1);
    }

    #[test]
    fn stale_source_notifications_are_ignored() {
        let queue = LiveQueue::new(ImmediateScheduler, 4);
        let first = Arc::new(ReadinessCell::default());
        let second = Arc::new(ReadinessCell::default());
        let seen = log();

        queue.set_observer(first.clone(), pusher(&seen));
        queue.set_observer(second, pusher(&seen));
        queue.post(1).unwrap();
        first.set(Readiness::Active);

        assert!(seen.lock().unwrap().is_empty());
        assert!(!queue.has_active_observer());
        assert_eq!(queue.backlog_len(), 1);
    }

    #[test]
    fn batch_flush_mode_sends_backlog_to_batch_sink_on_resume() {
        let config = LiveQueueConfig::new(4).with_flush_mode(FlushMode::Batch);
        let queue = LiveQueue::with_config(ImmediateScheduler, config);
        let host = Arc::new(ReadinessCell::new(Readiness::Inactive));
        let (live, paused) = (log(), log());

        queue.set_observer_with_batch(host.clone(), pusher(&live), pusher(&paused));
        queue.post("one").unwrap();
        queue.post("two").unwrap();
        host.set(Readiness::Active);

        assert!(live.lock().unwrap().is_empty());
        assert_eq!(*paused.lock().unwrap(), vec![vec!["one", "two"]]);
    }

    #[test]
    fn batch_flush_mode_falls_back_to_live_without_batch_sink() {
        let config = LiveQueueConfig::new(4).with_flush_mode(FlushMode::Batch);
        let queue = LiveQueue::with_config(ImmediateScheduler, config);
        let host = Arc::new(ReadinessCell::new(Readiness::Active));
        let live = log();

        queue.post(1).unwrap();
        queue.post(2).unwrap();
        queue.set_observer(host, pusher(&live));

        assert_eq!(*live.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn dropping_last_handle_unsubscribes() {
        let host = Arc::new(ReadinessCell::default());
        {
            let queue = LiveQueue::<u8>::new(ImmediateScheduler, 1);
            queue.set_observer(host.clone(), |_| {});
            assert_eq!(host.listener_count(), 1);
        }
        assert_eq!(host.listener_count(), 0);
    }

    #[test]
    fn deliveries_after_queue_dropped_are_noops() {
        let scheduler = Arc::new(ManualScheduler::new());
        let host = Arc::new(ReadinessCell::new(Readiness::Active));
        let seen = log();
        {
            let queue = LiveQueue::new(scheduler.clone(), 2);
            queue.set_observer(host.clone(), pusher(&seen));
            queue.post(5).unwrap();
        }
        assert_eq!(scheduler.run_all(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn terminal_transition_clears_binding_and_backlog() {
        let queue = LiveQueue::new(ImmediateScheduler, 4);
        let host = Arc::new(ReadinessCell::new(Readiness::Inactive));
        queue.set_observer(host.clone(), |_: u8| {});
        queue.post(1).unwrap();

        host.set(Readiness::Terminal);

        assert!(!queue.has_observer());
        assert_eq!(queue.backlog_len(), 0);
        assert_eq!(host.current(), Readiness::Terminal);
    }
}
