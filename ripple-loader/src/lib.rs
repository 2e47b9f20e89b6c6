//! RIPPLE Loader - Incremental-refresh loaders
//!
//! Two loaders keep a [`ConcurrentCache`] in step with an external source:
//!
//! - [`WatermarkLoader`] tracks one modification-time watermark and only
//!   advances it once a whole batch applied cleanly.
//! - [`VersionLoader`] tracks a content hash per key and advances each key
//!   on its own.
//!
//! Both implement [`ripple_core::RefreshCycle`] and can be handed to the
//! scheduler with `start` / `try_start`, or driven by calling `refresh`.
//!
//! [`ConcurrentCache`]: ripple_core::ConcurrentCache

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod processors;
pub mod version;
pub mod watermark;

pub use processors::{TimestampedProcessor, VerifyingProcessor};
pub use version::VersionLoader;
pub use watermark::WatermarkLoader;

// Every write to the guarded values is a single assignment, so a poisoned
// lock still holds a consistent value.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
