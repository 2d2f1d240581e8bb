//! Shared value cell with change notification and version tracking.
//!
//! [`Observable<T>`] wraps a `tokio::sync::watch` sender. Every `set` is a
//! change: the value is replaced wholesale, the version is bumped and all
//! receivers see `has_changed() == true` until they mark the value seen.
//! Consumers hold a receiver (see [`Observable::watch`]) instead of a copy of
//! the value, so they can never keep using a stale one unknowingly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

struct ObservableInner<T> {
    tx: watch::Sender<T>,
    version: AtomicU64,
}

/// A shared, version-tracked value.
///
/// Cloning an `Observable` creates a new handle to the **same** state.
pub struct Observable<T> {
    inner: Arc<ObservableInner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.tx.borrow())
            .field("version", &self.inner.version.load(Ordering::Acquire))
            .field("watchers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Observable<T> {
    /// Create a new observable. The initial version is 0.
    #[must_use]
    pub fn new(value: T) -> Self {
        let (tx, _rx) = watch::channel(value);
        Self {
            inner: Arc::new(ObservableInner {
                tx,
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.tx.borrow().clone()
    }

    /// Access the current value by reference.
    ///
    /// Do not call `set`/`update` on the same observable from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.tx.borrow())
    }

    /// Replace the value and notify every watcher.
    pub fn set(&self, value: T) {
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.tx.send_replace(value);
    }

    /// Modify the value in place and notify every watcher.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.version.fetch_add(1, Ordering::AcqRel);
        self.inner.tx.send_modify(f);
    }

    /// A receiver that reports changes made after this call.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<T> {
        self.inner.tx.subscribe()
    }

    /// Number of value-replacing mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Number of live receivers handed out by [`watch`](Self::watch).
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_basic() {
        let obs = Observable::new(42);
        assert_eq!(obs.get(), 42);
        assert_eq!(obs.version(), 0);

        obs.set(99);
        assert_eq!(obs.get(), 99);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn test_setting_equal_value_still_counts_as_change() {
        let obs = Observable::new(7);
        let rx = obs.watch();
        obs.set(7);
        assert_eq!(obs.version(), 1);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_update_mutates_in_place() {
        let obs = Observable::new(vec![1, 2, 3]);
        obs.update(|v| v.push(4));
        assert_eq!(obs.get(), vec![1, 2, 3, 4]);
        assert_eq!(obs.with(|v| v.len()), 4);
        assert_eq!(obs.version(), 1);
    }

    #[test]
    fn test_watcher_sees_only_later_changes() {
        let obs = Observable::new(String::from("a"));
        obs.set("b".to_string());

        let mut rx = obs.watch();
        assert!(!rx.has_changed().unwrap());

        obs.set("c".to_string());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), "c");
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_clone_shares_state() {
        let obs1 = Observable::new(0u64);
        let obs2 = obs1.clone();

        obs1.set(42);
        assert_eq!(obs2.get(), 42);
        assert_eq!(obs2.version(), 1);
    }

    #[test]
    fn test_watcher_count_tracks_receivers() {
        let obs = Observable::new(0u8);
        assert_eq!(obs.watcher_count(), 0);
        let rx = obs.watch();
        assert_eq!(obs.watcher_count(), 1);
        drop(rx);
        assert_eq!(obs.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_watcher_is_woken_by_set() {
        let obs = Observable::new(1u32);
        let mut rx = obs.watch();
        let writer = obs.clone();
        tokio::spawn(async move {
            writer.set(2);
        });
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 2);
    }
}
