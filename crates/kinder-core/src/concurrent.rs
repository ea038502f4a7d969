//! Combinators for running independent operations in parallel.
//!
//! Each operation becomes its own tokio task. Neither combinator cancels
//! anything: when [`until_first_error`] returns early, the remaining tasks keep
//! running to completion and their results are discarded.

use crate::error::{AggregateError, CoreError, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Run every operation concurrently and return the first failure to arrive.
///
/// Succeeds only once every operation has succeeded.
pub async fn until_first_error<I, F>(ops: I) -> Result<()>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<()>> + Send + 'static,
{
    let mut pending: FuturesUnordered<_> = ops.into_iter().map(tokio::spawn).collect();
    while let Some(joined) = pending.next().await {
        // Dropping `pending` on return detaches the remaining tasks.
        joined??;
    }
    Ok(())
}

/// Run every operation concurrently, wait for all of them, and report every
/// failure in submission order.
pub async fn collect_all_errors<I, F>(ops: I) -> std::result::Result<(), AggregateError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<()>> + Send + 'static,
{
    let handles: Vec<_> = ops.into_iter().map(tokio::spawn).collect();
    let errors = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(CoreError::Task(e)),
        })
        .collect();
    match AggregateError::new(errors) {
        Some(agg) => Err(agg),
        None => Ok(()),
    }
}
