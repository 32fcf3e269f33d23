use std::time::Duration;

/// Error type for this crate.
///
/// A rejected request is not an error: [`crate::RateLimiter::allow`] returns
/// `Ok(false)` for it. Every variant here means no decision could be made.
#[derive(Debug, thiserror::Error)]
pub enum SlidegateError {
    /// Redis error (connection refused, broken pipe, script failure, ...).
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// The store did not answer within the configured deadline.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid configuration, reported at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The subject cannot be turned into a storage key.
    #[error("invalid subject: {0}")]
    InvalidSubject(String),

    /// The request timestamp is NaN or infinite.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    /// The store answered with something the admission procedure does not understand.
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}
