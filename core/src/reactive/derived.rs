//! Async, memoized values with an explicit dependency set.
//!
//! A [`Derived<T>`] owns one [`Dependency`] handle per source it reads from.
//! Sources notify by marking the handle stale; the value is only recomputed
//! when someone calls [`Derived::get`] (notify-and-pull).
//!
//! # Invariants
//!
//! 1. `get()` without an intervening dependency change returns the memoized
//!    value and performs no computation.
//! 2. Dependencies are marked seen *before* the computation starts, so a
//!    change that lands while computing makes the next `get()` recompute.
//! 3. Concurrent `get()` calls on the same value share one computation.
//! 4. A failed computation is not memoized.

use futures::future::{select_all, BoxFuture};
use tokio::sync::{watch, Mutex};

use crate::errors::BindingError;

/// Something a [`Derived`] value depends on.
pub trait Dependency: Send + Sync {
    /// `true` when the source changed since the last [`mark_seen`](Self::mark_seen).
    fn is_stale(&self) -> bool;

    fn mark_seen(&mut self);

    /// An independent handle with the same seen-state.
    fn fork(&self) -> Box<dyn Dependency>;

    /// Resolve once the source changes. `false` if the source is gone.
    fn wait_changed(&mut self) -> BoxFuture<'_, bool>;
}

impl<T: Send + Sync + 'static> Dependency for watch::Receiver<T> {
    fn is_stale(&self) -> bool {
        self.has_changed().unwrap_or(false)
    }

    fn mark_seen(&mut self) {
        drop(self.borrow_and_update());
    }

    fn fork(&self) -> Box<dyn Dependency> {
        Box::new(self.clone())
    }

    fn wait_changed(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move { watch::Receiver::changed(self).await.is_ok() })
    }
}

/// The computation behind a [`Derived`] value.
pub type Compute<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, BindingError>> + Send + Sync>;

struct DerivedState<T> {
    deps: Vec<Box<dyn Dependency>>,
    memo: Option<T>,
}

/// A lazily recomputed value.
pub struct Derived<T> {
    label: String,
    state: Mutex<DerivedState<T>>,
    compute: Compute<T>,
}

impl<T> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Derived<T> {
    pub fn new(label: impl Into<String>, deps: Vec<Box<dyn Dependency>>, compute: Compute<T>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(DerivedState { deps, memo: None }),
            compute,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current value, recomputing first if any dependency changed.
    pub async fn get(&self) -> Result<T, BindingError> {
        let mut state = self.state.lock().await;
        if let Some(value) = state.memo.as_ref() {
            if !state.deps.iter().any(|d| d.is_stale()) {
                tracing::trace!(derived = %self.label, "memoized");
                return Ok(value.clone());
            }
        }

        state.memo = None;
        for dep in state.deps.iter_mut() {
            dep.mark_seen();
        }

        tracing::debug!(derived = %self.label, "recomputing");
        let value = (self.compute)().await?;
        state.memo = Some(value.clone());
        Ok(value)
    }

    /// Whether the next [`get`](Self::get) would recompute.
    pub async fn is_stale(&self) -> bool {
        let state = self.state.lock().await;
        state.memo.is_none() || state.deps.iter().any(|d| d.is_stale())
    }

    /// Wait until one of the dependencies changes.
    ///
    /// Resolves immediately if a change is already pending. Returns `false`
    /// when there is nothing left to wait on.
    pub async fn changed(&self) -> bool {
        let mut forks: Vec<Box<dyn Dependency>> = {
            let state = self.state.lock().await;
            state.deps.iter().map(|d| d.fork()).collect()
        };
        if forks.is_empty() {
            return false;
        }
        let waits = forks.iter_mut().map(|d| d.wait_changed());
        let (open, _, _) = select_all(waits).await;
        open
    }
}
