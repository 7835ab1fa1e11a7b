//! Bounded-concurrency scheduler.
//!
//! Every item becomes a future that must take a semaphore permit before it
//! starts. Futures are polled together from a `FuturesUnordered` on the
//! calling task, so results arrive in completion order while the real work
//! happens in child processes.
//!
//! Fail-fast closes the semaphore. Futures still waiting for a permit then
//! resolve without running, and futures that already hold one finish
//! normally.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info};

/// A finished task
#[derive(Debug, Clone)]
pub struct Completed<R> {
    pub result: R,
    /// Time spent holding the permit
    pub duration: Duration,
}

/// Run `task` over `items` with at most `limit` in flight.
///
/// `on_complete` sees every result as soon as it is ready. When `fail_fast`
/// is set, the first result for which `is_failure` holds stops any further
/// starts. Returns the number of items that were never started.
pub async fn run_bounded<T, R, F, Fut>(
    items: impl IntoIterator<Item = T>,
    limit: usize,
    fail_fast: bool,
    task: F,
    is_failure: impl Fn(&R) -> bool,
    mut on_complete: impl FnMut(Completed<R>),
) -> usize
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let task = &task;
    let mut in_flight: FuturesUnordered<_> = items
        .into_iter()
        .map(|item| {
            let permits = Arc::clone(&permits);
            async move {
                // Closed semaphore: fail-fast was triggered before this
                // item got a chance to start.
                let permit = Arc::clone(&permits).acquire_owned().await.ok()?;
                // A released permit may be handed to this item just before
                // the failure that closed the pool is observed.
                if permits.is_closed() {
                    return None;
                }
                let start = Instant::now();
                let result = task(item).await;
                drop(permit);
                Some(Completed {
                    result,
                    duration: start.elapsed(),
                })
            }
        })
        .collect();

    let mut not_started = 0;
    while let Some(completed) = in_flight.next().await {
        let Some(completed) = completed else {
            not_started += 1;
            continue;
        };
        if fail_fast && !permits.is_closed() && is_failure(&completed.result) {
            info!("failure observed, no new tests will be started");
            permits.close();
        }
        on_complete(completed);
    }

    if not_started > 0 {
        debug!(not_started, "skipped because of fail-fast");
    }
    not_started
}
