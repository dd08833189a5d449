//! Bounded fan-out
//!
//! Runs one task per item with a fixed concurrency width, waits for all of
//! them to settle and partitions the outcomes. Used at every level of the
//! pipeline (regions, resource types, metric batches, resources, metrics).

use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Outcome of a fan-out
#[derive(Debug)]
pub struct Settled<T, E> {
    pub succeeded: Vec<T>,
    pub failed: Vec<E>,
    /// Tasks that never finished because the token was cancelled
    pub cancelled: usize,
}

impl<T, E> Settled<T, E> {
    fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: 0,
        }
    }

    /// True when every task ran to completion
    pub fn is_complete(&self) -> bool {
        self.cancelled == 0
    }
}

/// Run `task` for every item, at most `width` at a time, and collect results.
///
/// Tasks that have not started when `cancel` fires are never polled, so no
/// upstream call is made for them.
pub async fn settle_all<I, F, Fut, T, E>(
    items: I,
    width: usize,
    cancel: &CancellationToken,
    mut task: F,
) -> Settled<T, E>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut settled = Settled::new();

    let mut outcomes = std::pin::pin!(stream::iter(items)
        .map(|item| {
            let work = task(item);
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = work => Some(outcome),
                }
            }
        })
        .buffer_unordered(width.max(1)));

    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Some(Ok(value)) => settled.succeeded.push(value),
            Some(Err(err)) => settled.failed.push(err),
            None => settled.cancelled += 1,
        }
    }

    settled
}
