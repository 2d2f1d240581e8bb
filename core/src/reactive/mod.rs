//! Change-tracking primitives used by the token binding.
//!
//! - [`Observable`]: a shared, replaceable value whose changes can be
//!   watched.
//! - [`Derived`]: an async, memoized value computed from an explicit set of
//!   [`Dependency`] handles. Dependencies notify, `get()` pulls.
//! - [`PushSlot`]: a latest-value slot fed by an external source that is
//!   acquired on the first observer and released when the last one drops.

pub mod derived;
pub mod observable;
pub mod push;

pub use derived::{Compute, Dependency, Derived};
pub use observable::Observable;
pub use push::{Lease, Publisher, PushObserver, PushSlot};
