//! Public entrypoint: `allow(timestamp, subject)`.

use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    Admission, KeyPrefix, MaxRequests, RateLimitDecision, SlidegateError, WindowBounds,
    WindowSize, runtime, store::WindowStore,
};

const MAX_SUBJECT_LEN: usize = 512;

/// Configuration for [`RateLimiter`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use slidegate::RateLimiterOptions;
///
/// let mut options = RateLimiterOptions::new(30f64, 3).unwrap();
/// options.store_timeout = Some(Duration::from_millis(50));
///
/// assert!(RateLimiterOptions::new(0f64, 3).is_err());
/// assert!(RateLimiterOptions::new(30f64, 0).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct RateLimiterOptions {
    /// Window length `W`, in timestamp units (seconds by convention).
    pub time_window: WindowSize,
    /// Quota `N` per window.
    pub max_requests: MaxRequests,
    /// Prefix of every window key. Defaults to [`KeyPrefix::default_prefix`].
    pub prefix: Option<KeyPrefix>,
    /// Deadline for each store call. `None` waits indefinitely.
    pub store_timeout: Option<Duration>,
}

impl RateLimiterOptions {
    /// Validate `time_window` and `max_requests` and use defaults for the rest.
    pub fn new(time_window: f64, max_requests: u64) -> Result<Self, SlidegateError> {
        Ok(Self {
            time_window: WindowSize::try_from(time_window)
                .map_err(|err| SlidegateError::InvalidConfig(err.to_string()))?,
            max_requests: MaxRequests::try_from(max_requests)
                .map_err(|err| SlidegateError::InvalidConfig(err.to_string()))?,
            prefix: None,
            store_timeout: None,
        })
    }
}

/// Turns subjects into window keys: `<prefix>:<subject>`.
#[derive(Clone, Debug)]
pub(crate) struct WindowKeyGenerator {
    prefix: KeyPrefix,
}

impl WindowKeyGenerator {
    pub(crate) fn new(prefix: KeyPrefix) -> Self {
        Self { prefix }
    }

    pub(crate) fn window_key(&self, subject: &str) -> Result<Arc<str>, SlidegateError> {
        if subject.is_empty() {
            return Err(SlidegateError::InvalidSubject(
                "subject must not be empty".to_string(),
            ));
        }

        if subject.len() > MAX_SUBJECT_LEN {
            return Err(SlidegateError::InvalidSubject(format!(
                "subject must not be longer than {MAX_SUBJECT_LEN} bytes"
            )));
        }

        Ok(Arc::from(format!("{}:{}", &*self.prefix, subject)))
    }
}

/// Sliding-window rate limiter over a shared [`WindowStore`].
///
/// Admits at most `max_requests` requests per subject within any window
/// `(t - time_window, t]`. The limiter itself only holds configuration: every
/// bit of state lives in the store, so any number of limiters, in any number of
/// processes, can enforce one quota together as long as they share the store,
/// the prefix and the configuration.
///
/// Timestamps are supplied by the caller and trusted as given. They need not be
/// monotonic or unique.
///
/// # Errors
///
/// A rejected request is `Ok(false)`. Errors mean no decision was made: the
/// store failed or timed out, or the input was unusable. They are never retried
/// here; whether to fail open or closed is up to the caller.
///
/// # Examples
///
/// ```
/// use slidegate::{MemoryWindowStore, RateLimiter, RateLimiterOptions};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let rl = RateLimiter::new(
///     RateLimiterOptions::new(30f64, 3).unwrap(),
///     MemoryWindowStore::new(),
/// );
///
/// let t0 = 1_700_000_000f64;
/// assert!(rl.allow(t0, "user_123").await.unwrap());
/// assert!(rl.allow(t0 + 1f64, "user_123").await.unwrap());
/// assert!(rl.allow(t0 + 2f64, "user_123").await.unwrap());
/// assert!(!rl.allow(t0 + 3f64, "user_123").await.unwrap());
/// # });
/// ```
pub struct RateLimiter<S> {
    store: S,
    time_window: WindowSize,
    max_requests: MaxRequests,
    store_timeout: Option<Duration>,
    key_generator: WindowKeyGenerator,
}

impl<S: WindowStore> RateLimiter<S> {
    /// Create a limiter over `store`.
    pub fn new(options: RateLimiterOptions, store: S) -> Self {
        let prefix = options.prefix.unwrap_or_else(KeyPrefix::default_prefix);

        Self {
            store,
            time_window: options.time_window,
            max_requests: options.max_requests,
            store_timeout: options.store_timeout,
            key_generator: WindowKeyGenerator::new(prefix),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Window length `W`.
    pub fn time_window(&self) -> WindowSize {
        self.time_window
    }

    /// Quota `N`.
    pub fn max_requests(&self) -> MaxRequests {
        self.max_requests
    }

    /// Storage key of `subject`'s window.
    pub fn window_key(&self, subject: &str) -> Result<Arc<str>, SlidegateError> {
        self.key_generator.window_key(subject)
    }

    /// Decide whether the request of `subject` at `timestamp` is admitted.
    ///
    /// Admitted requests are recorded and count against the quota until they
    /// fall out of the window.
    pub async fn allow(&self, timestamp: f64, subject: &str) -> Result<bool, SlidegateError> {
        Ok(self.check(timestamp, subject).await?.is_allowed())
    }

    /// Same as [`RateLimiter::allow`], with remaining quota or backoff hints.
    pub async fn check(
        &self,
        timestamp: f64,
        subject: &str,
    ) -> Result<RateLimitDecision, SlidegateError> {
        let key = self.window_key(subject)?;
        let timestamp = validate_timestamp(timestamp)?;

        let admission = Admission::new(timestamp, self.time_window, self.max_requests);
        let outcome = self
            .call("admit", &key, self.store.admit(&key, &admission))
            .await?;

        let decision = outcome.into_decision(&admission.bounds, self.time_window, self.max_requests);

        if let RateLimitDecision::Rejected {
            retry_after, count, ..
        } = &decision
        {
            tracing::debug!(key = %key, timestamp, count, retry_after, "rate_limiter.rejected");
        }

        Ok(decision)
    } // end method check

    /// Whether a request at `timestamp` would be admitted, without recording it.
    ///
    /// The answer can be stale by the time a following [`RateLimiter::allow`]
    /// runs; only `allow` is atomic.
    pub async fn is_allowed(&self, timestamp: f64, subject: &str) -> Result<bool, SlidegateError> {
        Ok(self.remaining(timestamp, subject).await? > 0)
    }

    /// How many more requests would be admitted in the window ending at `timestamp`.
    pub async fn remaining(&self, timestamp: f64, subject: &str) -> Result<u64, SlidegateError> {
        let key = self.window_key(subject)?;
        let timestamp = validate_timestamp(timestamp)?;

        let bounds = WindowBounds::anchored_at(timestamp, self.time_window);
        let snapshot = self
            .call("peek", &key, self.store.peek(&key, &bounds))
            .await?;

        Ok(self.max_requests.saturating_sub(snapshot.count))
    }

    /// Forget every recorded request of `subject`.
    pub async fn reset(&self, subject: &str) -> Result<(), SlidegateError> {
        let key = self.window_key(subject)?;

        self.call("clear", &key, self.store.clear(&key)).await
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        key: &str,
        fut: impl Future<Output = Result<T, SlidegateError>>,
    ) -> Result<T, SlidegateError> {
        runtime::with_deadline(self.store_timeout, fut)
            .await
            .inspect_err(|err| {
                tracing::warn!(error = %err, key, operation, "rate_limiter.store.error");
            })
    }
}

fn validate_timestamp(timestamp: f64) -> Result<f64, SlidegateError> {
    if timestamp.is_finite() {
        Ok(timestamp)
    } else {
        Err(SlidegateError::InvalidTimestamp(timestamp))
    }
}
