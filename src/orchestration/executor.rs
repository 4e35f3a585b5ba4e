//! Execution wrapper for single task attempts.
//!
//! `run_attempt` drives one invocation of the caller-supplied executor under
//! the task's deadline and cancellation token, and folds the result into one
//! of four outcomes. Retry decisions belong to the scheduler; the wrapper
//! never retries on its own.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Future returned by a task executor.
pub type TaskFuture<R> = BoxFuture<'static, Result<R>>;

/// The caller-supplied work function.
///
/// Invoked once per attempt with a shared handle to the task's payload, so
/// a retried task re-runs against the same payload. Idempotency across
/// attempts is the caller's responsibility.
pub trait TaskExecutor<P, R>: Send + Sync {
    fn execute(&self, payload: Arc<P>) -> TaskFuture<R>;
}

impl<P, R, F> TaskExecutor<P, R> for F
where
    F: Fn(Arc<P>) -> TaskFuture<R> + Send + Sync,
{
    fn execute(&self, payload: Arc<P>) -> TaskFuture<R> {
        self(payload)
    }
}

/// Outcome of a single execution attempt.
#[derive(Debug)]
pub enum ExecOutcome<R> {
    /// The executor returned normally.
    Success(R),
    /// The executor returned an error; the scheduler decides on retry.
    Error(String),
    /// The deadline elapsed before the executor returned.
    DeadlineExceeded(Duration),
    /// The attempt was aborted through its cancellation token.
    Cancelled,
}

/// Run one attempt of a task under its deadline.
pub async fn run_attempt<P, R>(
    executor: &dyn TaskExecutor<P, R>,
    payload: Arc<P>,
    deadline: Duration,
    token: &CancellationToken,
) -> ExecOutcome<R> {
    tokio::select! {
        _ = token.cancelled() => ExecOutcome::Cancelled,
        attempt = tokio::time::timeout(deadline, executor.execute(payload)) => match attempt {
            Ok(Ok(value)) => ExecOutcome::Success(value),
            Ok(Err(err)) => ExecOutcome::Error(err.to_string()),
            Err(_) => ExecOutcome::DeadlineExceeded(deadline),
        },
    }
}
