//! Bounded fan-out executor.
//!
//! [`WorkerPool::run`] starts one tokio task per work item, never more than
//! `limit` at a time, waits for all of them, and returns a [`BatchOutcome`]
//! whose vectors are index-aligned with the input.
//!
//! ## Result ownership
//!
//! Workers never touch the output vectors. Each spawned task returns
//! `(index, outcome)` and only the collecting loop writes `results[index]`
//! and `errors[index]`, so every slot has exactly one writer and no lock is
//! needed.
//!
//! ## Failure policy
//!
//! A failed, panicking, or aborted unit never cancels its siblings. Its slot
//! in `results` keeps `T::default()` and the reason lands in `errors`.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Number of CPUs the host reports, at least 1.
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Why a single unit of work produced no result.
#[derive(Debug, Error)]
pub enum UnitError<E> {
    /// The work function returned an error.
    #[error("{0}")]
    Failed(E),

    /// The work function panicked.
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The unit never reported back (runtime shutdown, task aborted).
    #[error("worker aborted before reporting a result")]
    Aborted,
}

/// Index-aligned results of one [`WorkerPool::run`] call.
#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    /// One entry per input item. Failed units hold `T::default()`.
    pub results: Vec<T>,
    /// One entry per input item. `None` means the unit succeeded.
    pub errors: Vec<Option<UnitError<E>>>,
}

impl<T, E> BatchOutcome<T, E> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of units that did not succeed.
    pub fn failure_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    /// `true` when there was at least one unit and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.errors.is_empty() && self.errors.iter().all(Option::is_some)
    }

    /// Iterate over `(index, error)` for every failed unit, in index order.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &UnitError<E>)> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }
}

/// Runs independent units of work under a fixed concurrency ceiling.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    limit: usize,
}

impl WorkerPool {
    /// A pool that runs at most `limit` units at once (minimum 1).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// OCR is CPU-bound: one slot per core plus one to cover I/O waits.
    pub fn for_ocr() -> Self {
        Self::new(host_parallelism() + 1)
    }

    /// Translation is network-bound; floor of 10 so small hosts still overlap
    /// enough backend calls.
    pub fn for_translation() -> Self {
        Self::new((host_parallelism() * 2).max(10))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `work(index, item)` for every item and wait for all of them.
    ///
    /// A worker slot is acquired before each unit is spawned and released
    /// when the unit finishes, however it finishes.
    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, work: F) -> BatchOutcome<T, E>
    where
        I: Send + 'static,
        T: Default + Send + 'static,
        E: Send + 'static,
        F: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = items.len();
        let mut results: Vec<T> = (0..total).map(|_| T::default()).collect();
        let mut errors: Vec<Option<UnitError<E>>> = (0..total).map(|_| None).collect();
        let mut reported = vec![false; total];

        let slots = Arc::new(Semaphore::new(self.limit));
        let work = Arc::new(work);
        let mut set = JoinSet::new();

        debug!("Running {} units with concurrency {}", total, self.limit);

        for (index, item) in items.into_iter().enumerate() {
            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Slots are never closed while `run` is alive.
                    errors[index] = Some(UnitError::Aborted);
                    reported[index] = true;
                    continue;
                }
            };
            let work = Arc::clone(&work);
            set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(async move { work(index, item).await })
                    .catch_unwind()
                    .await;
                (index, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(Ok(value)))) => {
                    results[index] = value;
                    reported[index] = true;
                }
                Ok((index, Ok(Err(e)))) => {
                    errors[index] = Some(UnitError::Failed(e));
                    reported[index] = true;
                }
                Ok((index, Err(payload))) => {
                    let msg = panic_message(payload.as_ref());
                    warn!("Unit {} panicked: {}", index, msg);
                    errors[index] = Some(UnitError::Panicked(msg));
                    reported[index] = true;
                }
                Err(join_err) => {
                    warn!("Worker task did not complete: {}", join_err);
                }
            }
        }

        for (index, done) in reported.iter().enumerate() {
            if !done {
                errors[index] = Some(UnitError::Aborted);
            }
        }

        BatchOutcome { results, errors }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::for_ocr()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
