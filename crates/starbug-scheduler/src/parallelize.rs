//! Bounded fan-out of blocking work

use crate::error::{Result, SchedulerError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Default number of concurrent workers
pub const DEFAULT_PARALLELISM: usize = 16;

/// Runs a piece of work for each index in `0..pieces` on at most
/// `parallelism` blocking workers
#[derive(Debug, Clone, Copy)]
pub struct Parallelizer {
    parallelism: usize,
}

impl Default for Parallelizer {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM)
    }
}

impl Parallelizer {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run `work` for every piece until all are done or `cancel` fires
    ///
    /// Workers pull indices from a shared counter, so pieces start roughly in
    /// order. After cancellation no new piece is started; pieces already
    /// running finish.
    pub async fn until<F>(&self, cancel: &CancellationToken, pieces: usize, work: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if pieces == 0 {
            return Ok(());
        }

        let work = Arc::new(work);
        let next = Arc::new(AtomicUsize::new(0));
        let mut workers = JoinSet::new();

        for _ in 0..self.parallelism.min(pieces) {
            let work = work.clone();
            let next = next.clone();
            let cancel = cancel.clone();
            workers.spawn_blocking(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let piece = next.fetch_add(1, Ordering::SeqCst);
                if piece >= pieces {
                    break;
                }
                work(piece);
            });
        }

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Parallel worker failed: {}", e);
                cancel.cancel();
                failure.get_or_insert(e.to_string());
            }
        }

        match failure {
            Some(message) => Err(SchedulerError::internal_error(format!(
                "parallel worker failed: {}",
                message
            ))),
            None => Ok(()),
        }
    }
}

/// Keeps the first error reported by concurrent workers
#[derive(Debug, Default)]
pub struct ErrorChannel {
    error: Mutex<Option<SchedulerError>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` unless an earlier error is already held
    fn send(&self, err: SchedulerError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Record `err` and stop the workers
    pub fn send_with_cancel(&self, err: SchedulerError, cancel: &CancellationToken) {
        self.send(err);
        cancel.cancel();
    }

    /// Take the recorded error, if any
    pub fn receive(&self) -> Option<SchedulerError> {
        self.error.lock().take()
    }
}
