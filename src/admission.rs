//! The prune + count + admit decision procedure.
//!
//! An admission for a request at `t` runs, as one indivisible unit against the
//! subject's window:
//!
//! 1. remove every record with score `<= t - W`
//! 2. count the records with score in `(t - W, t]`
//! 3. if the count is below the quota, insert `(t, fresh id)` and refresh the
//!    key expiry to `W`; otherwise reject without recording anything
//!
//! Stores provide the indivisibility. [`crate::RedisWindowStore`] ships
//! [`ADMISSION_SCRIPT`] to the server, where Redis runs it without interleaving
//! other clients. [`crate::MemoryWindowStore`] runs [`apply`] while holding the
//! key's map entry lock.
//!
//! Splitting the count and the insert into two round trips lets two callers both
//! observe `count < N` before either inserts, admitting `N + 1`. Nothing in this
//! crate composes the primitives that way.

use std::{sync::Arc, time::Duration};

use crate::{MaxRequests, RateLimitDecision, SlidegateError, WindowSize};

/// The window of a request at `upper`: the half-open interval `(cutoff, upper]`.
///
/// A record scored exactly `cutoff` is stale, one scored exactly `upper` counts.
/// Pruning and counting always go through the same value so both agree on the
/// edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowBounds {
    /// Exclusive lower edge, `t - W`.
    pub cutoff: f64,
    /// Inclusive upper edge, `t`.
    pub upper: f64,
}

impl WindowBounds {
    /// Bounds of the window ending at `timestamp`.
    pub fn anchored_at(timestamp: f64, window: WindowSize) -> Self {
        Self {
            cutoff: timestamp - *window,
            upper: timestamp,
        }
    }

    /// Whether a record with this score has aged out.
    pub fn is_stale(&self, score: f64) -> bool {
        score <= self.cutoff
    }

    /// Whether a record with this score counts against the quota.
    pub fn contains(&self, score: f64) -> bool {
        score > self.cutoff && score <= self.upper
    }

    /// `ZCOUNT`/`ZRANGEBYSCORE` min argument, exclusive.
    pub(crate) fn redis_min(&self) -> String {
        format!("({}", self.cutoff)
    }

    /// `ZCOUNT`/`ZRANGEBYSCORE` max argument, inclusive.
    pub(crate) fn redis_max(&self) -> String {
        self.upper.to_string()
    }
}

/// One admitted request as stored in a window.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// The request timestamp.
    pub score: f64,
    /// `<timestamp>:<16 hex digits>`; unique even when scores collide.
    pub id: Arc<str>,
}

impl EventRecord {
    /// A record for `timestamp` with a freshly generated identity.
    pub fn fresh(timestamp: f64) -> Self {
        let suffix: u64 = rand::random();

        Self {
            score: timestamp,
            id: Arc::from(format!("{timestamp}:{suffix:016x}")),
        }
    }
}

/// Everything a store needs to run one admission.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Window of the request.
    pub bounds: WindowBounds,
    /// Quota for the window.
    pub max_requests: u64,
    /// Record to insert if admitted.
    pub record: EventRecord,
    /// Expiry applied to the key if admitted.
    pub ttl: Duration,
}

impl Admission {
    /// Prepare the admission of a request at `timestamp`.
    pub fn new(timestamp: f64, window: WindowSize, max_requests: MaxRequests) -> Self {
        Self {
            bounds: WindowBounds::anchored_at(timestamp, window),
            max_requests: *max_requests,
            record: EventRecord::fresh(timestamp),
            ttl: window.ttl(),
        }
    }
}

/// What the store decided.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionOutcome {
    /// Whether the record was inserted.
    pub admitted: bool,
    /// Records in the window after the decision.
    pub count: u64,
    /// Oldest score still in the window; reported on rejection.
    pub oldest_score: Option<f64>,
}

impl AdmissionOutcome {
    pub(crate) fn into_decision(
        self,
        bounds: &WindowBounds,
        window: WindowSize,
        max_requests: MaxRequests,
    ) -> RateLimitDecision {
        if self.admitted {
            return RateLimitDecision::Allowed {
                remaining: max_requests.saturating_sub(self.count),
            };
        }

        let retry_after = self
            .oldest_score
            .map(|oldest| (oldest + *window - bounds.upper).max(0f64))
            .unwrap_or(0f64);

        RateLimitDecision::Rejected {
            window: *window,
            retry_after,
            count: self.count,
        }
    }
}

/// Read-only view of a window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowSnapshot {
    /// Records inside the bounds.
    pub count: u64,
    /// Smallest score inside the bounds.
    pub oldest_score: Option<f64>,
}

/// Window primitives for stores that hold a window in process memory and can
/// lock it for the duration of [`apply`].
pub(crate) trait WindowOps {
    fn prune_below(&mut self, bounds: &WindowBounds) -> u64;
    fn snapshot(&self, bounds: &WindowBounds) -> WindowSnapshot;
    fn insert(&mut self, record: EventRecord) -> bool;
    fn set_expiry(&mut self, ttl: Duration);
}

/// Run one admission against an exclusively borrowed window.
///
/// The caller must hold whatever lock makes `window` invisible to other
/// admissions for the same key until this returns.
///
/// Fails without touching the expiry if a record with the same id is already
/// stored; nothing was admitted in that case.
pub(crate) fn apply<W: WindowOps>(
    window: &mut W,
    admission: &Admission,
) -> Result<AdmissionOutcome, SlidegateError> {
    window.prune_below(&admission.bounds);

    let snapshot = window.snapshot(&admission.bounds);

    if snapshot.count >= admission.max_requests {
        return Ok(AdmissionOutcome {
            admitted: false,
            count: snapshot.count,
            oldest_score: snapshot.oldest_score,
        });
    }

    if !window.insert(admission.record.clone()) {
        return Err(duplicate_record(&admission.record.id));
    }
    window.set_expiry(admission.ttl);

    Ok(AdmissionOutcome {
        admitted: true,
        count: snapshot.count + 1,
        oldest_score: None,
    })
}

pub(crate) fn duplicate_record(id: &str) -> SlidegateError {
    SlidegateError::UnexpectedReply(format!("record {id} is already stored"))
}

/// Server-side admission for a Redis sorted set.
///
/// KEYS[1] window key. ARGV: cutoff, timestamp, max requests, member, ttl (ms).
/// Replies `{admitted (0|1), count, oldest in-window score or ""}`, or
/// `{2, count, ""}` when the member already exists and nothing was added.
pub(crate) const ADMISSION_SCRIPT: &str = r#"
local key = KEYS[1]

local cutoff = ARGV[1]
local timestamp = ARGV[2]
local max_requests = tonumber(ARGV[3])
local member = ARGV[4]
local ttl_ms = tonumber(ARGV[5])

redis.call("ZREMRANGEBYSCORE", key, "-inf", cutoff)

local count = redis.call("ZCOUNT", key, "(" .. cutoff, timestamp)

if count >= max_requests then
    local oldest = redis.call("ZRANGEBYSCORE", key, "(" .. cutoff, timestamp, "WITHSCORES", "LIMIT", 0, 1)
    local oldest_score = ""
    if #oldest > 0 then
        oldest_score = oldest[2]
    end

    return {0, count, oldest_score}
end

local added = redis.call("ZADD", key, "NX", timestamp, member)
if added == 0 then
    return {2, count, ""}
end

redis.call("PEXPIRE", key, ttl_ms)

return {1, count + 1, ""}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn w(v: f64) -> WindowSize {
        WindowSize::try_from(v).unwrap()
    }

    #[test]
    fn bounds_are_open_on_the_left_closed_on_the_right() {
        let b = WindowBounds::anchored_at(130f64, w(30f64));

        assert!(b.is_stale(100f64));
        assert!(!b.contains(100f64));
        assert!(b.contains(100.5));
        assert!(b.contains(130f64));
        assert!(!b.contains(130.5));
        assert!(!b.is_stale(130.5));
    }

    #[test]
    fn redis_range_arguments_match_bounds() {
        let b = WindowBounds::anchored_at(10.5, w(2f64));
        assert_eq!(b.redis_min(), "(8.5");
        assert_eq!(b.redis_max(), "10.5");
    }

    #[test]
    fn fresh_records_share_score_but_not_identity() {
        let a = EventRecord::fresh(42f64);
        let b = EventRecord::fresh(42f64);

        assert_eq!(a.score, b.score);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("42:"));
        assert_eq!(a.id.len(), "42:".len() + 16);
    }

    #[test]
    fn rejection_reports_time_until_oldest_ages_out() {
        let window = w(30f64);
        let max = MaxRequests::try_from(3).unwrap();
        let bounds = WindowBounds::anchored_at(103f64, window);

        let outcome = AdmissionOutcome {
            admitted: false,
            count: 3,
            oldest_score: Some(100f64),
        };

        assert_eq!(
            outcome.into_decision(&bounds, window, max),
            RateLimitDecision::Rejected {
                window: 30f64,
                retry_after: 27f64,
                count: 3,
            }
        );
    }

    #[test]
    fn admission_reports_remaining_quota() {
        let window = w(30f64);
        let max = MaxRequests::try_from(3).unwrap();
        let bounds = WindowBounds::anchored_at(0f64, window);

        let outcome = AdmissionOutcome {
            admitted: true,
            count: 1,
            oldest_score: None,
        };

        assert_eq!(
            outcome.into_decision(&bounds, window, max),
            RateLimitDecision::Allowed { remaining: 2 }
        );
    }
}
