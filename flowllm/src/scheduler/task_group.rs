//! Per-op task group: submit cooperative tasks, then join them with a local
//! timeout and either fail-fast or exception-collecting semantics.

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;

/// Tasks submitted by one op execution.
///
/// The group's token is a child of the invocation token: context-level
/// cancellation reaches every task, while a group-local cancel (join timeout
/// or sibling failure) stays scoped to this group.
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<Result<Value, FlowError>>>,
}

impl TaskGroup {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    /// The group-scoped token; cancelling it stops only this group's tasks.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Submits one cooperative task. The task observes the group token at its
    /// next suspension point and settles as `Cancelled` once it fires.
    pub fn submit<F>(&mut self, fut: F)
    where
        F: Future<Output = Result<Value, FlowError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Err(FlowError::cancelled("task group cancelled")),
                result = fut => result,
            }
        }));
    }

    /// Waits for all tasks submitted so far.
    ///
    /// - `timeout` elapsed: cancel the group, wait for settlement, return
    ///   `Err(Timeout)`. `Some(ZERO)` acts as an immediate poll.
    /// - a task errors and `return_exceptions=false`: cancel the siblings,
    ///   wait for settlement, return the first error observed.
    /// - `return_exceptions=true`: wait for everything; results come back in
    ///   submission order with errors embedded at their positions.
    pub async fn join(
        &mut self,
        timeout: Option<Duration>,
        return_exceptions: bool,
    ) -> Result<Vec<Result<Value, FlowError>>, FlowError> {
        let tasks = std::mem::take(&mut self.tasks);
        let count = tasks.len();
        let mut ordered: Vec<Option<Result<Value, FlowError>>> =
            (0..count).map(|_| None).collect();

        let mut pending: FuturesUnordered<_> = tasks
            .into_iter()
            .enumerate()
            .map(|(index, handle)| async move { (index, handle.await) })
            .collect();

        // A missing timeout sleeps effectively forever; tokio clamps huge
        // durations internally.
        const NO_DEADLINE: Duration = Duration::from_secs(60 * 60 * 24 * 365);
        let deadline = tokio::time::sleep(timeout.unwrap_or(NO_DEADLINE));
        tokio::pin!(deadline);
        let mut first_error: Option<usize> = None;
        let mut timed_out = false;

        while !pending.is_empty() {
            tokio::select! {
                // Drain already-completed tasks before the deadline can fire,
                // so join(timeout=0) observes finished work.
                biased;
                Some((index, joined)) = pending.next() => {
                    let result = flatten_join(joined);
                    if !timed_out && result.is_err() && !return_exceptions && first_error.is_none() {
                        first_error = Some(index);
                        self.cancel.cancel();
                    }
                    ordered[index] = Some(result);
                }
                _ = &mut deadline, if timeout.is_some() && !timed_out => {
                    timed_out = true;
                    self.cancel.cancel();
                }
            }
        }

        if timed_out && first_error.is_none() {
            let elapsed = timeout.unwrap_or_default();
            return Err(FlowError::Timeout(format!(
                "join timed out after {elapsed:?}"
            )));
        }
        if let Some(index) = first_error {
            let err = ordered[index]
                .take()
                .and_then(|r| r.err())
                .unwrap_or_else(|| FlowError::cancelled("task group cancelled"));
            return Err(err);
        }
        Ok(ordered
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(FlowError::cancelled("task never settled"))))
            .collect())
    }
}

fn flatten_join(
    joined: Result<Result<Value, FlowError>, tokio::task::JoinError>,
) -> Result<Value, FlowError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(FlowError::cancelled("task aborted")),
        Err(e) => Err(FlowError::op_failed(format!("task panicked: {e}"))),
    }
}
