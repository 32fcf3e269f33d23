use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use super::runtime::{async_sleep, block_on};
use crate::{
    Admission, AdmissionOutcome, EventRecord, MemoryWindowStore, RateLimiter, RateLimiterOptions,
    SlidegateError, WindowBounds, WindowSnapshot, WindowStore,
};

/// Delegates to a memory store after an optional delay, or fails outright.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryWindowStore,
    delay: Option<Duration>,
    unavailable: bool,
    calls: AtomicU64,
}

impl FlakyStore {
    async fn enter(&self) -> Result<(), SlidegateError> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if let Some(delay) = self.delay {
            async_sleep(delay).await;
        }

        if self.unavailable {
            return Err(SlidegateError::UnexpectedReply("connection reset".to_string()));
        }

        Ok(())
    }
}

impl WindowStore for FlakyStore {
    async fn prune_below(&self, key: &str, bounds: &WindowBounds) -> Result<u64, SlidegateError> {
        self.enter().await?;
        self.inner.prune_below(key, bounds).await
    }

    async fn count_in_range(
        &self,
        key: &str,
        bounds: &WindowBounds,
    ) -> Result<u64, SlidegateError> {
        self.enter().await?;
        self.inner.count_in_range(key, bounds).await
    }

    async fn insert(&self, key: &str, record: &EventRecord) -> Result<bool, SlidegateError> {
        self.enter().await?;
        self.inner.insert(key, record).await
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), SlidegateError> {
        self.enter().await?;
        self.inner.set_expiry(key, ttl).await
    }

    async fn admit(
        &self,
        key: &str,
        admission: &Admission,
    ) -> Result<AdmissionOutcome, SlidegateError> {
        self.enter().await?;
        self.inner.admit(key, admission).await
    }

    async fn peek(&self, key: &str, bounds: &WindowBounds) -> Result<WindowSnapshot, SlidegateError> {
        self.enter().await?;
        self.inner.peek(key, bounds).await
    }

    async fn clear(&self, key: &str) -> Result<(), SlidegateError> {
        self.enter().await?;
        self.inner.clear(key).await
    }
}

fn options() -> RateLimiterOptions {
    RateLimiterOptions::new(30f64, 3).unwrap()
}

#[test]
fn store_failure_is_an_error_not_a_rejection() {
    block_on(async {
        let rl = RateLimiter::new(
            options(),
            FlakyStore {
                unavailable: true,
                ..Default::default()
            },
        );

        assert!(matches!(
            rl.allow(1f64, "u").await,
            Err(SlidegateError::UnexpectedReply(_))
        ));
        assert!(rl.remaining(1f64, "u").await.is_err());
        assert!(rl.reset("u").await.is_err());

        // Not retried internally.
        assert_eq!(rl.store().calls.load(Ordering::Relaxed), 3);
        assert_eq!(rl.store().inner.window_count(), 0);
    });
}

#[test]
fn slow_store_times_out_without_recording() {
    block_on(async {
        let mut options = options();
        options.store_timeout = Some(Duration::from_millis(20));

        let rl = RateLimiter::new(
            options,
            FlakyStore {
                delay: Some(Duration::from_millis(200)),
                ..Default::default()
            },
        );

        match rl.allow(1f64, "u").await {
            Err(SlidegateError::Timeout(deadline)) => {
                assert_eq!(deadline, Duration::from_millis(20))
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        assert_eq!(rl.store().inner.window_count(), 0);
    });
}

#[test]
fn fast_store_is_unaffected_by_deadline() {
    block_on(async {
        let mut options = options();
        options.store_timeout = Some(Duration::from_millis(500));

        let rl = RateLimiter::new(
            options,
            FlakyStore {
                delay: Some(Duration::from_millis(1)),
                ..Default::default()
            },
        );

        assert!(rl.allow(1f64, "u").await.unwrap());
        assert!(rl.allow(1f64, "u").await.unwrap());
        assert!(rl.allow(1f64, "u").await.unwrap());
        assert!(!rl.allow(1f64, "u").await.unwrap());
    });
}
