//! Readiness signal consumed by [`crate::LiveQueue`].
//!
//! A readiness source reports whether its observer can take items right now
//! ([`Readiness::Active`]), should have them buffered
//! ([`Readiness::Inactive`]), or is gone for good ([`Readiness::Terminal`]).
//! Terminal is sticky: once reported, the source never transitions again.
//!
//! [`ReadinessCell`] is a ready-made source driven by explicit `set` calls or
//! by host lifecycle events.
//!
//! # Listener contract
//! - `subscribe` must not call the listener synchronously.
//! - Listeners must be invoked without any lock of the source held; they
//!   re-enter the queue and may call [`ReadinessSource::unsubscribe`].
//! - A listener may still run once after being unsubscribed if a
//!   notification was already in flight.
//! - Notifications from racing transitions may arrive out of order; listeners
//!   treat the value as a hint and [`ReadinessSource::current`] as the truth.

use alloc::sync::Arc;
use alloc::vec::Vec;

#[cfg(feature = "portable-atomic")]
use portable_atomic::{AtomicU8, AtomicU64, Ordering};

#[cfg(not(feature = "portable-atomic"))]
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};

/// Readiness of an observer as seen by the queue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Readiness {
    /// Deliver items as they are posted.
    Active,
    /// Buffer items (or flush the backlog to a batch sink).
    Inactive,
    /// Destroyed; the binding is dropped and the backlog cleared.
    Terminal,
}

impl Readiness {
    #[inline]
    pub const fn is_active(self) -> bool {
        matches!(self, Readiness::Active)
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Readiness::Terminal)
    }

    const fn to_u8(self) -> u8 {
        match self {
            Readiness::Active => 0,
            Readiness::Inactive => 1,
            Readiness::Terminal => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Readiness::Active,
            1 => Readiness::Inactive,
            _ => Readiness::Terminal,
        }
    }
}

/// Callback invoked on every readiness transition.
pub type ReadinessListener = Arc<dyn Fn(Readiness) + Send + Sync>;

/// Handle returned by [`ReadinessSource::subscribe`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Something that knows whether its observer is ready and says so when it
/// changes.
pub trait ReadinessSource: Send + Sync {
    /// Readiness right now.
    fn current(&self) -> Readiness;

    /// Register `listener` for future transitions.
    fn subscribe(&self, listener: ReadinessListener) -> SubscriptionId;

    /// Stop notifying the listener registered under `id`. Unknown ids are
    /// ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

impl<S: ReadinessSource + ?Sized> ReadinessSource for Arc<S> {
    fn current(&self) -> Readiness {
        (**self).current()
    }

    fn subscribe(&self, listener: ReadinessListener) -> SubscriptionId {
        (**self).subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        (**self).unsubscribe(id)
    }
}

/// Host lifecycle events, mapped onto [`Readiness`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
}

impl LifecycleEvent {
    /// Readiness a host is in right after this event.
    pub const fn readiness(self) -> Readiness {
        match self {
            LifecycleEvent::Resume => Readiness::Active,
            LifecycleEvent::Destroy => Readiness::Terminal,
            LifecycleEvent::Create
            | LifecycleEvent::Start
            | LifecycleEvent::Pause
            | LifecycleEvent::Stop => Readiness::Inactive,
        }
    }
}

struct ListenerEntry {
    id: SubscriptionId,
    listener: ReadinessListener,
}

/// Settable [`ReadinessSource`].
///
/// Notifications are delivered on the thread calling [`ReadinessCell::set`],
/// from a snapshot of the listener list taken before any listener runs.
pub struct ReadinessCell {
    state: AtomicU8,
    next_id: AtomicU64,
    listeners: spin::Mutex<Vec<ListenerEntry>>,
}

impl ReadinessCell {
    pub fn new(initial: Readiness) -> Self {
        Self {
            state: AtomicU8::new(initial.to_u8()),
            next_id: AtomicU64::new(1),
            listeners: spin::Mutex::new(Vec::new()),
        }
    }

    /// Move to `next` and notify listeners.
    ///
    /// Returns `false` without notifying when `next` equals the current
    /// readiness or the cell is already terminal.
    pub fn set(&self, next: Readiness) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == next.to_u8() || Readiness::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let snapshot: Vec<ReadinessListener> = {
            let mut listeners = self.listeners.lock();
            let snapshot = listeners.iter().map(|e| e.listener.clone()).collect();
            if next.is_terminal() {
                listeners.clear();
            }
            snapshot
        };
        for listener in snapshot.iter() {
            listener(next);
        }
        true
    }

    /// Apply a host lifecycle event.
    #[inline]
    pub fn handle_lifecycle_event(&self, event: LifecycleEvent) -> bool {
        self.set(event.readiness())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for ReadinessCell {
    fn default() -> Self {
        Self::new(Readiness::Inactive)
    }
}

impl ReadinessSource for ReadinessCell {
    #[inline]
    fn current(&self) -> Readiness {
        Readiness::from_u8(self.state.load(Ordering::Acquire))
    }

    fn subscribe(&self, listener: ReadinessListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(ListenerEntry { id, listener });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut listeners = self.listeners.lock();
        if let Some(position) = listeners.iter().position(|entry| entry.id == id) {
            listeners.swap_remove(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LifecycleEvent, Readiness, ReadinessCell, ReadinessSource};
    use std::sync::{Arc, Mutex};
    use std::vec::Vec;

    fn recording(cell: &ReadinessCell) -> Arc<Mutex<Vec<Readiness>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        cell.subscribe(Arc::new(move |r: Readiness| sink.lock().unwrap().push(r)));
        seen
    }

    #[test]
    fn notifies_on_transitions_only() {
        let cell = ReadinessCell::new(Readiness::Inactive);
        let seen = recording(&cell);

        assert!(!cell.set(Readiness::Inactive));
        assert!(cell.set(Readiness::Active));
        assert!(cell.set(Readiness::Inactive));

        assert_eq!(
            &seen.lock().unwrap()[..],
            &[Readiness::Active, Readiness::Inactive]
        );
        assert_eq!(cell.current(), Readiness::Inactive);
    }

    #[test]
    fn terminal_is_sticky_and_drops_listeners() {
        let cell = ReadinessCell::new(Readiness::Active);
        let seen = recording(&cell);

        assert!(cell.set(Readiness::Terminal));
        assert!(!cell.set(Readiness::Active));

        assert_eq!(cell.current(), Readiness::Terminal);
        assert_eq!(&seen.lock().unwrap()[..], &[Readiness::Terminal]);
        assert_eq!(cell.listener_count(), 0);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let cell = ReadinessCell::default();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        let id = cell.subscribe(Arc::new(move |_: Readiness| *sink.lock().unwrap() += 1));

        cell.unsubscribe(id);
        cell.set(Readiness::Active);

        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(cell.listener_count(), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let cell = Arc::new(ReadinessCell::default());
        let slot = Arc::new(Mutex::new(None));
        let (weak, id_slot) = (Arc::downgrade(&cell), slot.clone());
        let id = cell.subscribe(Arc::new(move |_: Readiness| {
            if let (Some(cell), Some(id)) = (weak.upgrade(), *id_slot.lock().unwrap()) {
                cell.unsubscribe(id);
            }
        }));
        *slot.lock().unwrap() = Some(id);

        cell.set(Readiness::Active);
        assert_eq!(cell.listener_count(), 0);
    }

    #[test]
    fn lifecycle_events_map_to_readiness() {
        let cell = ReadinessCell::default();
        cell.handle_lifecycle_event(LifecycleEvent::Resume);
        assert_eq!(cell.current(), Readiness::Active);
        cell.handle_lifecycle_event(LifecycleEvent::Pause);
        assert_eq!(cell.current(), Readiness::Inactive);
        cell.handle_lifecycle_event(LifecycleEvent::Destroy);
        assert_eq!(cell.current(), Readiness::Terminal);
        assert_eq!(LifecycleEvent::Start.readiness(), Readiness::Inactive);
    }
}
