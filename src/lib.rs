#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod rate_limiter;
pub use rate_limiter::*;

mod admission;
pub use admission::*;

pub mod store;
pub use store::{MemoryWindowStore, WindowStore};

#[cfg(feature = "redis")]
pub use store::{RedisWindowStore, RedisWindowStoreOptions};

mod error;
pub use error::*;

mod common;
pub use common::{KeyPrefix, MaxRequests, RateLimitDecision, WindowSize};

mod runtime;

#[cfg(test)]
mod tests;
