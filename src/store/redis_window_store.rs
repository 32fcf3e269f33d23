use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use redis::{Client, Script, aio::ConnectionManager};

use crate::{
    Admission, AdmissionOutcome, EventRecord, SlidegateError, WindowBounds, WindowSnapshot,
    admission::{self, ADMISSION_SCRIPT},
    store::WindowStore,
};

/// Connection settings for [`RedisWindowStore::connect`].
///
/// # Requirements
///
/// - **Redis version:** >= 3.0.2 (`ZADD NX`)
///
/// # Examples
///
/// ```ignore
/// let store = RedisWindowStore::connect(RedisWindowStoreOptions {
///     url: "redis://127.0.0.1:6379/".to_string(),
///     connection_count: 4,
/// })
/// .await?;
/// ```
#[derive(Clone, Debug)]
pub struct RedisWindowStoreOptions {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379/`.
    pub url: String,
    /// Multiplexed connections to open. Must be at least 1.
    pub connection_count: usize,
}

impl Default for RedisWindowStoreOptions {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            connection_count: 1,
        }
    }
}

/// [`WindowStore`] backed by Redis sorted sets.
///
/// Each window is one sorted set: member `<timestamp>:<suffix>`, score
/// `<timestamp>`. Admissions run as a single Lua script, which Redis executes
/// without interleaving commands from other clients, so any number of processes
/// can share one window without over-admitting.
///
/// A failed script (connection lost, server error) leaves no partial state
/// behind: either the whole script ran or none of it did.
#[derive(Clone)]
pub struct RedisWindowStore {
    // Each manager multiplexes one connection and reconnects on its own.
    connection_managers: Arc<[ConnectionManager]>,
    next_connection: Arc<AtomicUsize>,
    admission_script: Script,
}

impl RedisWindowStore {
    /// Open the connections described by `options`.
    pub async fn connect(options: RedisWindowStoreOptions) -> Result<Self, SlidegateError> {
        let client = redis::Client::open(options.url.as_str())?;

        Self::from_client(client, options.connection_count).await
    }

    /// Open `connection_count` multiplexed connections through `client`.
    ///
    /// Admissions are spread over the connections round-robin.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, SlidegateError> {
        if connection_count == 0 {
            return Err(SlidegateError::InvalidConfig(
                "connection count must be at least 1".to_string(),
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);
        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self {
            connection_managers: connection_managers.into(),
            next_connection: Arc::new(AtomicUsize::new(0)),
            admission_script: Script::new(ADMISSION_SCRIPT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        let index = round_robin(&self.next_connection, self.connection_managers.len());
        self.connection_managers[index].clone()
    }
}

fn round_robin(next: &AtomicUsize, len: usize) -> usize {
    next.fetch_add(1, Ordering::Relaxed) % len
}

impl fmt::Debug for RedisWindowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisWindowStore")
            .field("connections", &self.connection_managers.len())
            .field("admission_script", &self.admission_script.get_hash())
            .finish()
    }
}

impl WindowStore for RedisWindowStore {
    async fn prune_below(&self, key: &str, bounds: &WindowBounds) -> Result<u64, SlidegateError> {
        let mut connection_manager = self.connection();

        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(bounds.cutoff.to_string())
            .query_async(&mut connection_manager)
            .await?;

        Ok(removed)
    }

    async fn count_in_range(
        &self,
        key: &str,
        bounds: &WindowBounds,
    ) -> Result<u64, SlidegateError> {
        let mut connection_manager = self.connection();

        let count: u64 = redis::cmd("ZCOUNT")
            .arg(key)
            .arg(bounds.redis_min())
            .arg(bounds.redis_max())
            .query_async(&mut connection_manager)
            .await?;

        Ok(count)
    }

    async fn insert(&self, key: &str, record: &EventRecord) -> Result<bool, SlidegateError> {
        let mut connection_manager = self.connection();

        let added: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(record.score.to_string())
            .arg(&*record.id)
            .query_async(&mut connection_manager)
            .await?;

        Ok(added == 1)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<(), SlidegateError> {
        let mut connection_manager = self.connection();

        let _: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl.as_millis() as u64)
            .query_async(&mut connection_manager)
            .await?;

        Ok(())
    }

    async fn admit(
        &self,
        key: &str,
        admission: &Admission,
    ) -> Result<AdmissionOutcome, SlidegateError> {
        let mut connection_manager = self.connection();

        let (admitted, count, oldest_score): (i64, u64, String) = self
            .admission_script
            .key(key)
            .arg(admission.bounds.cutoff.to_string())
            .arg(admission.bounds.upper.to_string())
            .arg(admission.max_requests)
            .arg(&*admission.record.id)
            .arg(admission.ttl.as_millis() as u64)
            .invoke_async(&mut connection_manager)
            .await?;

        let admitted = match admitted {
            1 => true,
            0 => false,
            2 => return Err(admission::duplicate_record(&admission.record.id)),
            other => {
                return Err(SlidegateError::UnexpectedReply(format!(
                    "admission flag {other}"
                )));
            }
        };

        let oldest_score = if oldest_score.is_empty() {
            None
        } else {
            let score = oldest_score.parse::<f64>().map_err(|_| {
                SlidegateError::UnexpectedReply(format!("oldest score {oldest_score:?}"))
            })?;
            Some(score)
        };

        Ok(AdmissionOutcome {
            admitted,
            count,
            oldest_score,
        })
    }

    async fn peek(&self, key: &str, bounds: &WindowBounds) -> Result<WindowSnapshot, SlidegateError> {
        let mut connection_manager = self.connection();

        let (count, oldest): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .cmd("ZCOUNT")
            .arg(key)
            .arg(bounds.redis_min())
            .arg(bounds.redis_max())
            .cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(bounds.redis_min())
            .arg(bounds.redis_max())
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(1)
            .query_async(&mut connection_manager)
            .await?;

        Ok(WindowSnapshot {
            count,
            oldest_score: oldest.first().map(|(_, score)| *score),
        })
    }

    async fn clear(&self, key: &str) -> Result<(), SlidegateError> {
        let mut connection_manager = self.connection();

        let _: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;

        Ok(())
    }
}
