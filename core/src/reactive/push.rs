//! Latest-value slots fed by an external push source.
//!
//! A [`PushSlot`] does not hold its source open on its own. The first
//! [`PushObserver`] acquires a [`Lease`] through the slot's acquire
//! function; dropping the last observer releases it and clears the slot.
//! Values published while nobody observes are never seen.
//!
//! Each acquisition gets a fresh generation. A [`Publisher`] from an older
//! lease is ignored even if its source fires after release.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;

use crate::errors::BindingError;

/// A held external resource. Dropping it releases the resource.
pub struct Lease {
    _resource: Box<dyn Any + Send>,
}

impl Lease {
    pub fn new<R: Send + 'static>(resource: R) -> Self {
        Self {
            _resource: Box::new(resource),
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").finish_non_exhaustive()
    }
}

struct Slot<E> {
    tx: watch::Sender<Option<E>>,
    generation: AtomicU64,
}

/// Write handle given to the source when a lease is acquired.
pub struct Publisher<E> {
    slot: Weak<Slot<E>>,
    generation: u64,
}

impl<E> Clone for Publisher<E> {
    fn clone(&self) -> Self {
        Self {
            slot: Weak::clone(&self.slot),
            generation: self.generation,
        }
    }
}

impl<E> Publisher<E> {
    /// Overwrite the slot. Returns `false` when the lease this publisher
    /// belongs to has been released.
    pub fn publish(&self, value: E) -> bool {
        let Some(slot) = self.slot.upgrade() else {
            return false;
        };
        if slot.generation.load(Ordering::Acquire) != self.generation {
            return false;
        }
        slot.tx.send_replace(Some(value));
        true
    }
}

/// Acquires the external source for a slot.
pub type Acquire<E> = Box<dyn Fn(Publisher<E>) -> Result<Lease, BindingError> + Send + Sync>;

struct LeaseState {
    observers: usize,
    lease: Option<Lease>,
}

pub struct PushSlot<E> {
    label: &'static str,
    slot: Arc<Slot<E>>,
    state: Mutex<LeaseState>,
    acquire: Acquire<E>,
}

impl<E: Clone + Send + Sync + 'static> PushSlot<E> {
    pub fn new(label: &'static str, acquire: Acquire<E>) -> Arc<Self> {
        let (tx, _rx) = watch::channel(None);
        Arc::new(Self {
            label,
            slot: Arc::new(Slot {
                tx,
                generation: AtomicU64::new(0),
            }),
            state: Mutex::new(LeaseState {
                observers: 0,
                lease: None,
            }),
            acquire,
        })
    }

    /// Attach an observer, acquiring the source if this is the first one.
    ///
    /// If acquisition fails no observer is registered.
    pub fn observe(self: &Arc<Self>) -> Result<PushObserver<E>, BindingError> {
        let mut state = self.lock_state();
        if state.observers == 0 {
            let generation = self.slot.generation.load(Ordering::Acquire);
            let publisher = Publisher {
                slot: Arc::downgrade(&self.slot),
                generation,
            };
            let lease = (self.acquire)(publisher)?;
            tracing::debug!(slot = self.label, generation, "source acquired");
            state.lease = Some(lease);
        }
        state.observers += 1;
        Ok(PushObserver {
            feed: Arc::clone(self),
            rx: self.slot.tx.subscribe(),
        })
    }

    pub fn observer_count(&self) -> usize {
        self.lock_state().observers
    }

    /// Whether a source lease is currently held.
    pub fn is_active(&self) -> bool {
        self.lock_state().lease.is_some()
    }

    fn release(&self) {
        let lease = {
            let mut state = self.lock_state();
            state.observers = state.observers.saturating_sub(1);
            if state.observers > 0 {
                return;
            }
            self.slot.generation.fetch_add(1, Ordering::AcqRel);
            self.slot.tx.send_replace(None);
            state.lease.take()
        };
        if lease.is_some() {
            tracing::debug!(slot = self.label, "source released");
        }
        drop(lease);
    }

    fn lock_state(&self) -> MutexGuard<'_, LeaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An attached observer of a [`PushSlot`].
pub struct PushObserver<E: Clone + Send + Sync + 'static> {
    feed: Arc<PushSlot<E>>,
    rx: watch::Receiver<Option<E>>,
}

impl<E: Clone + Send + Sync + 'static> PushObserver<E> {
    /// Most recent value published since the source was acquired.
    pub fn latest(&self) -> Option<E> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published value.
    pub async fn next(&mut self) -> Option<E> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }
}

impl<E: Clone + Send + Sync + 'static> Drop for PushObserver<E> {
    fn drop(&mut self) {
        self.feed.release();
    }
}
