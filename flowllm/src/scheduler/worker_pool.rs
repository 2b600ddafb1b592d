//! Bounded worker pool for blocking op bodies and sync submissions from
//! cooperative ops.
//!
//! A semaphore of `thread_pool_max_workers` permits fronts tokio's blocking
//! thread pool. When every permit is taken, `submit_blocking` waits — that
//! wait is the backpressure mechanism — and a fired cancellation token
//! unblocks the waiter with `Cancelled`.

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;

pub struct WorkerPool {
    permits: std::sync::Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: std::sync::Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Permits currently free; `0` means the next submit blocks.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `f` on the blocking tier, waiting for a free worker first.
    ///
    /// Cancellation while waiting returns `Cancelled` without running `f`.
    /// Cancellation while running returns `Cancelled` to the caller; the
    /// blocking body itself is not preempted and must poll its context token
    /// at natural I/O boundaries.
    pub async fn submit_blocking<T, F>(
        &self,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, FlowError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, FlowError> + Send + 'static,
    {
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FlowError::cancelled("cancelled while waiting for a worker"));
            }
            acquired = self.permits.clone().acquire_owned() => {
                acquired.map_err(|_| FlowError::cancelled("worker pool closed"))?
            }
        };

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });
        tokio::select! {
            _ = cancel.cancelled() => {
                Err(FlowError::cancelled("cancelled while running on the worker pool"))
            }
            joined = handle => match joined {
                Ok(result) => result,
                Err(e) => Err(FlowError::op_failed(format!("worker panicked: {e}"))),
            },
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("available", &self.available())
            .finish()
    }
}
