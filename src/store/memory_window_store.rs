use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::{
    Admission, AdmissionOutcome, EventRecord, SlidegateError, WindowBounds, WindowSnapshot,
    admission::{self, WindowOps},
    runtime,
    store::WindowStore,
};

#[derive(Debug, Default)]
struct MemoryWindow {
    // Sorted by score; records with equal scores keep insertion order.
    records: Vec<EventRecord>,
    expires_at: Option<Instant>,
}

impl MemoryWindow {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl WindowOps for MemoryWindow {
    fn prune_below(&mut self, bounds: &WindowBounds) -> u64 {
        let stale = self
            .records
            .partition_point(|record| bounds.is_stale(record.score));
        self.records.drain(..stale);

        stale as u64
    }

    fn snapshot(&self, bounds: &WindowBounds) -> WindowSnapshot {
        let mut in_window = self
            .records
            .iter()
            .filter(|record| bounds.contains(record.score));

        let Some(oldest) = in_window.next() else {
            return WindowSnapshot::default();
        };

        WindowSnapshot {
            count: 1 + in_window.count() as u64,
            oldest_score: Some(oldest.score),
        }
    }

    fn insert(&mut self, record: EventRecord) -> bool {
        if self.records.iter().any(|existing| existing.id == record.id) {
            return false;
        }

        let at = self
            .records
            .partition_point(|existing| existing.score <= record.score);
        self.records.insert(at, record);

        true
    }

    fn set_expiry(&mut self, ttl: Duration) {
        self.expires_at = Some(Instant::now() + ttl);
    }
}

/// Process-local [`WindowStore`].
///
/// Keeps every window in a [`DashMap`]. Admissions for one key run while the
/// map entry is write-locked, so they are serialized exactly like script
/// executions on a Redis server. Clones share the same windows, which lets
/// several [`crate::RateLimiter`]s stand in for independent processes.
///
/// Expiry is enforced lazily: an expired window is discarded the next time it
/// is touched, or by [`MemoryWindowStore::purge_expired`]. Long-running
/// processes with many short-lived subjects should also call
/// [`MemoryWindowStore::spawn_expiry_loop`].
#[derive(Debug, Clone, Default)]
pub struct MemoryWindowStore {
    windows: Arc<DashMap<Arc<str>, MemoryWindow>>,
}

impl MemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) windows.
    pub fn window_count(&self) -> usize {
        let now = Instant::now();
        self.windows
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    /// Number of records stored for `key`, stale or not; 0 once the window expired.
    pub fn record_count(&self, key: &str) -> usize {
        let now = Instant::now();
        match self.windows.get(key) {
            Some(window) if !window.is_expired(now) => window.records.len(),
            _ => 0,
        }
    }

    /// Remaining time-to-live of `key`, if it has one and has not expired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let window = self.windows.get(key)?;
        let expires_at = window.expires_at?;

        expires_at.checked_duration_since(now)
    }

    /// Drop every expired window; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.windows)
    }

    /// Periodically purge expired windows on the current tokio runtime.
    ///
    /// The task holds only a weak handle and ends on its own once every clone
    /// of the store is dropped. Abort the returned handle to stop it earlier.
    pub fn spawn_expiry_loop(&self, period: Duration) -> JoinHandle<()> {
        let windows: Weak<DashMap<Arc<str>, MemoryWindow>> = Arc::downgrade(&self.windows);

        runtime::spawn_task(async move {
            let mut interval = runtime::new_interval(period);

            loop {
                runtime::tick(&mut interval).await;

                let Some(windows) = windows.upgrade() else {
                    break;
                };

                let removed = purge(&windows);
                if removed > 0 {
                    tracing::trace!(removed, "memory_store.purge");
                }
            }
        })
    }

    // Runs `f` on the live window for `key`, if there is one.
    fn with_live<T>(&self, key: &str, f: impl FnOnce(&mut MemoryWindow) -> T) -> Option<T> {
        let now = Instant::now();
        let mut window = self.windows.get_mut(key)?;

        if window.is_expired(now) {
            drop(window);
            self.windows.remove_if(key, |_, window| window.is_expired(now));
            return None;
        }

        Some(f(&mut window))
    }

    // Runs `f` on the window for `key`, replacing an expired one with a fresh window.
    fn with_entry<T>(&self, key: &str, f: impl FnOnce(&mut MemoryWindow) -> T) -> T {
        let now = Instant::now();
        let mut window = self.windows.entry(Arc::from(key)).or_default();

        if window.is_expired(now) {
            *window = MemoryWindow::default();
        }

        f(&mut window)
    }
}

fn purge(windows: &DashMap<Arc<str>, MemoryWindow>) -> usize {
    let now = Instant::now();
    let before = windows.len();
    windows.retain(|_, window| !window.is_expired(now));

    before.saturating_sub(windows.len())
}

impl WindowStore for MemoryWindowStore {
    async fn prune_below(&self, key: &str, bounds: &WindowBounds) -> Result<u64, SlidegateError> {
        Ok(self
            .with_live(key, |window| window.prune_below(bounds))
            .unwrap_or(0))
    }

    async fn count_in_range(
        &self,
        key: &str,
        bounds: &WindowBounds,
    ) -> Result<u64, SlidegateError> {
        Ok(self
            .with_live(key, |window| window.snapshot(bounds).count)
            .unwrap_or(0))
    }

    async fn insert(&self, key: &str, record: &EventRecord) -> Result<bool, SlidegateError> {
        Ok(self.with_entry(key, |window| window.insert(record.clone())))
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), SlidegateError> {
        self.with_live(key, |window| window.set_expiry(ttl));
        Ok(())
    }

    async fn admit(
        &self,
        key: &str,
        admission: &Admission,
    ) -> Result<AdmissionOutcome, SlidegateError> {
        self.with_entry(key, |window| admission::apply(window, admission))
    }

    async fn peek(&self, key: &str, bounds: &WindowBounds) -> Result<WindowSnapshot, SlidegateError> {
        Ok(self
            .with_live(key, |window| window.snapshot(bounds))
            .unwrap_or_default())
    }

    async fn clear(&self, key: &str) -> Result<(), SlidegateError> {
        self.windows.remove(key);
        Ok(())
    }
}
