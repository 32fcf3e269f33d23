//! Shared window storage.
//!
//! A window store holds one score-ordered set of [`EventRecord`]s per key and
//! exposes the primitives the admission procedure is made of. Each primitive is
//! usable on its own, but only [`WindowStore::admit`] combines them atomically;
//! the facade never builds a decision out of separate calls.
//!
//! # Implementations
//!
//! - [`RedisWindowStore`]: sorted sets in a shared Redis, admission as a Lua script
//! - [`MemoryWindowStore`]: process-local, admission under the key's map entry lock

use std::{future::Future, time::Duration};

use crate::{
    Admission, AdmissionOutcome, EventRecord, SlidegateError, WindowBounds, WindowSnapshot,
};

mod memory_window_store;
pub use memory_window_store::*;

#[cfg(feature = "redis")]
mod redis_window_store;
#[cfg(feature = "redis")]
pub use redis_window_store::*;

/// Storage backend for sliding windows.
///
/// Implementations must serialize [`WindowStore::admit`] calls for the same key:
/// every admission observes the committed result of all earlier ones.
pub trait WindowStore: Send + Sync {
    /// Remove every record of `key` that is stale for `bounds`, returning how many went.
    fn prune_below(
        &self,
        key: &str,
        bounds: &WindowBounds,
    ) -> impl Future<Output = Result<u64, SlidegateError>> + Send;

    /// Count the records of `key` inside `bounds`.
    fn count_in_range(
        &self,
        key: &str,
        bounds: &WindowBounds,
    ) -> impl Future<Output = Result<u64, SlidegateError>> + Send;

    /// Add `record` to `key`. Returns `false` if a record with the same id exists;
    /// the existing record is left untouched.
    fn insert(
        &self,
        key: &str,
        record: &EventRecord,
    ) -> impl Future<Output = Result<bool, SlidegateError>> + Send;

    /// Set or refresh the time-to-live of the whole window.
    fn set_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), SlidegateError>> + Send;

    /// Prune, count and conditionally insert as one atomic unit.
    fn admit(
        &self,
        key: &str,
        admission: &Admission,
    ) -> impl Future<Output = Result<AdmissionOutcome, SlidegateError>> + Send;

    /// Read the window without modifying it.
    fn peek(
        &self,
        key: &str,
        bounds: &WindowBounds,
    ) -> impl Future<Output = Result<WindowSnapshot, SlidegateError>> + Send;

    /// Drop the whole window.
    fn clear(&self, key: &str) -> impl Future<Output = Result<(), SlidegateError>> + Send;
}
