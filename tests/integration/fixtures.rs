//! Shared fixtures for the integration suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;

use conductor::{Error, OrchestratorConfig, TaskFuture};

/// Order in which executors observed their payloads.
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Config tuned for fast tests: short default deadline, no retry backoff.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_tasks: 8,
        default_timeout_secs: 5,
        default_max_retries: 0,
        retry_delay_secs: 0,
        ..Default::default()
    }
}

/// Executor that sleeps, then echoes its payload.
pub fn sleeper(delay: Duration) -> impl Fn(Arc<String>) -> TaskFuture<String> + Send + Sync {
    move |payload: Arc<String>| {
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Error>((*payload).clone())
        }
        .boxed()
    }
}

/// Executor that records each payload at dispatch, sleeps, then echoes it.
pub fn recording_sleeper(
    delay: Duration,
    log: ExecutionLog,
) -> impl Fn(Arc<String>) -> TaskFuture<String> + Send + Sync {
    move |payload: Arc<String>| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push((*payload).clone());
            tokio::time::sleep(delay).await;
            Ok::<_, Error>((*payload).clone())
        }
        .boxed()
    }
}

/// Executor that fails its first `fail_times` invocations, then succeeds.
/// Counts every invocation in `attempts`.
pub fn flaky(
    fail_times: usize,
    attempts: Arc<AtomicUsize>,
) -> impl Fn(Arc<String>) -> TaskFuture<String> + Send + Sync {
    move |payload: Arc<String>| {
        let attempts = Arc::clone(&attempts);
        async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= fail_times {
                Err(Error::Execution(format!("attempt {} failed", attempt)))
            } else {
                Ok((*payload).clone())
            }
        }
        .boxed()
    }
}
