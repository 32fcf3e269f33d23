use std::{ops::Deref, sync::Arc, time::Duration};

/// Length of the sliding window, in the same units as request timestamps.
///
/// Timestamps are conventionally epoch seconds; the store-side expiry is derived
/// from this value under that assumption (see [`WindowSize::ttl`]).
///
/// Must be finite, greater than 0 and at most [`WindowSize::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct WindowSize(f64);

impl WindowSize {
    /// Largest accepted window. Its expiry in milliseconds, added to the current
    /// epoch time, still fits the signed 64-bit range Redis uses for `PEXPIRE`.
    pub const MAX: f64 = 1e12;

    /// Time-to-live applied to a window key after each admission.
    ///
    /// Rounded up to whole milliseconds so a window never expires before its
    /// last record has aged out.
    pub fn ttl(&self) -> Duration {
        let ms = (self.0 * 1000.0).ceil().max(1.0);
        Duration::from_millis(ms as u64)
    }
}

impl Deref for WindowSize {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for WindowSize {
    type Error = &'static str;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            Err("Window size must be finite")
        } else if value <= 0f64 {
            Err("Window size must be greater than 0")
        } else if value > Self::MAX {
            Err("Window size must not exceed 1e12")
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<u64> for WindowSize {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::try_from(value as f64)
    }
}

/// Maximum number of admitted requests per subject inside one window.
///
/// Must be at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaxRequests(u64);

impl Deref for MaxRequests {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for MaxRequests {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err("Max requests must be at least 1")
        } else {
            Ok(Self(value))
        }
    }
}

/// A validated prefix for window keys.
///
/// Window keys are laid out as `<prefix>:<subject>`, so the prefix:
/// - must not be empty
/// - must not be longer than 255 bytes
/// - must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    /// The prefix used when none is configured.
    pub fn default_prefix() -> Self {
        Self(Arc::from("slidegate"))
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::default_prefix()
    }
}

impl Deref for KeyPrefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<&str> for KeyPrefix {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err("Key prefix must not be empty")
        } else if value.len() > 255 {
            Err("Key prefix must not be longer than 255 bytes")
        } else if value.contains(':') {
            Err("Key prefix must not contain colons")
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitDecision {
    /// The request is admitted and recorded in the subject's window.
    Allowed {
        /// Requests still admittable in the window anchored at the request's timestamp.
        remaining: u64,
    },
    /// The request is rejected; nothing was recorded.
    ///
    /// Includes best-effort hints for callers that want to communicate backoff.
    Rejected {
        /// Window length used for the decision.
        window: f64,
        /// Time, in timestamp units, until the oldest counted record leaves the window.
        retry_after: f64,
        /// Records counted against the quota when the decision was made.
        count: u64,
    },
}

impl RateLimitDecision {
    /// `true` for [`RateLimitDecision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}
