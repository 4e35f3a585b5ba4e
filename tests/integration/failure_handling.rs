//! Retry, permanent failure, and deadline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;

use conductor::{Error, Orchestrator, TaskSpec, TaskState};

use crate::fixtures::{fast_config, flaky, sleeper};

/// A task that always fails is attempted max_retries + 1 times, then
/// reports Failed carrying the last error.
#[tokio::test]
async fn test_always_failing_task_exhausts_retries() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(fast_config(), flaky(usize::MAX, attempts.clone()));
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit(TaskSpec::new("a", "x".to_string()).max_retries(2))
        .await
        .unwrap();
    let result = orchestrator.wait_for(&id, Some(Duration::from_secs(3))).await;

    assert!(matches!(result, Err(Error::Execution(msg)) if msg.contains("attempt 3")));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let snapshot = orchestrator.status(&id).await.unwrap();
    assert!(matches!(snapshot.state, TaskState::Failed { .. }));
    assert_eq!(snapshot.retry_count, 2);

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.counters.failed, 1);
    orchestrator.stop().await.unwrap();
}

/// A task that fails exactly max_retries times then succeeds is retried
/// exactly that often and ultimately reports success.
#[tokio::test]
async fn test_retry_then_succeed() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::new(fast_config(), flaky(2, attempts.clone()));
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit(TaskSpec::new("a", "recovered".to_string()).max_retries(2))
        .await
        .unwrap();
    let result = orchestrator
        .wait_for(&id, Some(Duration::from_secs(3)))
        .await
        .unwrap();

    assert_eq!(result, "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.counters.completed, 1);
    assert_eq!(metrics.counters.failed, 0);
    orchestrator.stop().await.unwrap();
}

/// A permanent failure cancels every transitive dependent with an error
/// naming the dead dependency.
#[tokio::test]
async fn test_failure_cascades_to_dependents() {
    let executor = |payload: Arc<String>| {
        async move {
            if *payload == "fail" {
                Err(Error::Execution("boom".to_string()))
            } else {
                Ok((*payload).clone())
            }
        }
        .boxed()
    };
    let orchestrator = Orchestrator::new(fast_config(), executor);
    orchestrator.start().await.unwrap();

    let a = orchestrator
        .submit(TaskSpec::new("a", "fail".to_string()))
        .await
        .unwrap();
    let b = orchestrator
        .submit(TaskSpec::new("b", "b".to_string()).depends_on(["a"]))
        .await
        .unwrap();
    let c = orchestrator
        .submit(TaskSpec::new("c", "c".to_string()).depends_on(["b"]))
        .await
        .unwrap();

    let result = orchestrator.wait_for(&b, Some(Duration::from_secs(3))).await;
    assert!(matches!(result, Err(Error::Cancelled(reason)) if reason.contains("a")));

    let result = orchestrator.wait_for(&c, Some(Duration::from_secs(3))).await;
    assert!(matches!(result, Err(Error::Cancelled(_))));

    assert!(matches!(
        orchestrator.status(&a).await.unwrap().state,
        TaskState::Failed { .. }
    ));

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.counters.failed, 1);
    assert_eq!(metrics.counters.cancelled, 2);
    orchestrator.stop().await.unwrap();
}

/// A task whose executor never returns transitions to TimedOut at roughly
/// its deadline, and the waiter observes the task's timeout rather than
/// hanging for the executor.
#[tokio::test]
async fn test_timeout_fires_at_deadline() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(500)));
    orchestrator.start().await.unwrap();

    let started = Instant::now();
    let id = orchestrator
        .submit(TaskSpec::new("a", "x".to_string()).timeout(Duration::from_millis(100)))
        .await
        .unwrap();
    let result = orchestrator.wait_for(&id, None).await;

    assert!(matches!(
        result,
        Err(Error::TaskTimeout(limit)) if limit == Duration::from_millis(100)
    ));
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "timeout must fire near the deadline, not when the executor returns"
    );

    let snapshot = orchestrator.status(&id).await.unwrap();
    assert!(matches!(snapshot.state, TaskState::TimedOut { .. }));

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.counters.timeouts, 1);
    orchestrator.stop().await.unwrap();
}

/// Deadlines are terminal immediately; the retry budget is not spent on
/// them.
#[tokio::test]
async fn test_timeout_does_not_consume_retries() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(500)));
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit(
            TaskSpec::new("a", "x".to_string())
                .timeout(Duration::from_millis(50))
                .max_retries(3),
        )
        .await
        .unwrap();
    let result = orchestrator.wait_for(&id, Some(Duration::from_secs(2))).await;

    assert!(matches!(result, Err(Error::TaskTimeout(_))));
    let snapshot = orchestrator.status(&id).await.unwrap();
    assert_eq!(snapshot.retry_count, 0);
    orchestrator.stop().await.unwrap();
}

/// A timed-out dependency cascades to its dependents like a failure.
#[tokio::test]
async fn test_timeout_cascades_to_dependents() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(500)));
    orchestrator.start().await.unwrap();

    orchestrator
        .submit(TaskSpec::new("slow", "x".to_string()).timeout(Duration::from_millis(50)))
        .await
        .unwrap();
    let dependent = orchestrator
        .submit(TaskSpec::new("after", "x".to_string()).depends_on(["slow"]))
        .await
        .unwrap();

    let result = orchestrator
        .wait_for(&dependent, Some(Duration::from_secs(2)))
        .await;
    assert!(matches!(result, Err(Error::Cancelled(reason)) if reason.contains("timed out")));
    orchestrator.stop().await.unwrap();
}

/// The wait's own timeout is a distinct error kind and does not disturb the
/// still-running task.
#[tokio::test]
async fn test_wait_timeout_is_not_task_timeout() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(200)));
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit(TaskSpec::new("a", "late".to_string()))
        .await
        .unwrap();

    let result = orchestrator
        .wait_for(&id, Some(Duration::from_millis(30)))
        .await;
    assert!(matches!(result, Err(Error::WaitTimeout(_))));

    // The task itself is unaffected and still completes.
    let value = orchestrator
        .wait_for(&id, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(value, "late");
    orchestrator.stop().await.unwrap();
}
