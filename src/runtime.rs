use std::{future::Future, time::Duration};

use tokio::task::JoinHandle;

use crate::SlidegateError;

pub(crate) type Interval = tokio::time::Interval;

pub(crate) fn new_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

pub(crate) async fn tick(interval: &mut Interval) {
    interval.tick().await;
}

pub(crate) fn spawn_task<F>(fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut)
}

/// Run a store call, failing it as a whole if `deadline` elapses first.
pub(crate) async fn with_deadline<F, T>(
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, SlidegateError>
where
    F: Future<Output = Result<T, SlidegateError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| SlidegateError::Timeout(deadline))?,
        None => fut.await,
    }
}
