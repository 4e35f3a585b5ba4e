//! Dependency ordering and parallel throughput tests.

use std::time::{Duration, Instant};

use conductor::{Orchestrator, OrchestratorConfig, TaskSpec};

use crate::fixtures::{fast_config, new_log, recording_sleeper, sleeper};

/// A single task with a short executor returns its result well within the
/// caller's wait window.
#[tokio::test]
async fn test_single_task_completes() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(50)));
    orchestrator.start().await.unwrap();

    let id = orchestrator
        .submit(TaskSpec::new("a", "ok".to_string()))
        .await
        .unwrap();
    let result = orchestrator
        .wait_for(&id, Some(Duration::from_millis(500)))
        .await
        .unwrap();

    assert_eq!(result, "ok");
    orchestrator.stop().await.unwrap();
}

/// Submitting a chain in reverse order (dependents first, via forward
/// references) still executes in dependency order.
#[tokio::test]
async fn test_reverse_submission_executes_in_dependency_order() {
    let log = new_log();
    let orchestrator = Orchestrator::new(
        fast_config(),
        recording_sleeper(Duration::from_millis(20), log.clone()),
    );
    orchestrator.start().await.unwrap();

    orchestrator
        .submit(TaskSpec::new("c", "c".to_string()).depends_on(["b"]))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("b", "b".to_string()).depends_on(["a"]))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("a", "a".to_string()))
        .await
        .unwrap();

    orchestrator
        .wait_for(&"c".into(), Some(Duration::from_secs(3)))
        .await
        .unwrap();

    let order = log.lock().unwrap().clone();
    assert_eq!(order, vec!["a", "b", "c"]);
    orchestrator.stop().await.unwrap();
}

/// A diamond a -> (b, c) -> d runs its middle layer after a and its bottom
/// after both middles.
#[tokio::test]
async fn test_diamond_execution_order() {
    let log = new_log();
    let orchestrator = Orchestrator::new(
        fast_config(),
        recording_sleeper(Duration::from_millis(20), log.clone()),
    );
    orchestrator.start().await.unwrap();

    orchestrator
        .submit(TaskSpec::new("a", "a".to_string()))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("b", "b".to_string()).depends_on(["a"]))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("c", "c".to_string()).depends_on(["a"]))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("d", "d".to_string()).depends_on(["b", "c"]))
        .await
        .unwrap();

    orchestrator
        .wait_for(&"d".into(), Some(Duration::from_secs(3)))
        .await
        .unwrap();

    let order = log.lock().unwrap().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], "a");
    assert_eq!(order[3], "d");
    orchestrator.stop().await.unwrap();
}

/// Independent tasks with capacity to spare finish in roughly one executor
/// duration, not one per task.
#[tokio::test]
async fn test_independent_tasks_run_in_parallel() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(150)));
    orchestrator.start().await.unwrap();

    let started = Instant::now();
    let mut ids = Vec::new();
    for i in 0..6 {
        let id = orchestrator
            .submit(TaskSpec::new(format!("task-{}", i), "x".to_string()))
            .await
            .unwrap();
        ids.push(id);
    }
    for id in &ids {
        orchestrator
            .wait_for(id, Some(Duration::from_secs(3)))
            .await
            .unwrap();
    }

    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(900),
        "6 parallel 150ms tasks took {:?}, expected roughly one duration",
        elapsed
    );
    orchestrator.stop().await.unwrap();
}

/// With a single execution slot, queued tasks dispatch in priority order.
#[tokio::test]
async fn test_priority_order_with_single_slot() {
    let config = OrchestratorConfig {
        max_concurrent_tasks: 1,
        ..fast_config()
    };
    let log = new_log();
    let orchestrator = Orchestrator::new(
        config,
        recording_sleeper(Duration::from_millis(20), log.clone()),
    );

    // Queue everything before the loop starts so the first dispatch pass
    // sees all three.
    orchestrator
        .submit(TaskSpec::new("low", "low".to_string()).priority(1))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("high", "high".to_string()).priority(5))
        .await
        .unwrap();
    orchestrator
        .submit(TaskSpec::new("mid", "mid".to_string()).priority(3))
        .await
        .unwrap();

    orchestrator.start().await.unwrap();
    for id in ["low", "high", "mid"] {
        orchestrator
            .wait_for(&id.into(), Some(Duration::from_secs(3)))
            .await
            .unwrap();
    }

    let order = log.lock().unwrap().clone();
    assert_eq!(order, vec!["high", "mid", "low"]);
    orchestrator.stop().await.unwrap();
}

/// Randomly wired layered DAGs never start a task before all of its
/// dependencies finished. The generator is a seeded LCG so failures
/// reproduce.
#[tokio::test]
async fn test_random_dag_respects_dependency_order() {
    let log = new_log();
    let orchestrator = Orchestrator::new(
        fast_config(),
        recording_sleeper(Duration::from_millis(5), log.clone()),
    );
    orchestrator.start().await.unwrap();

    // 4 layers of 4 tasks; each task depends on a pseudo-random subset of
    // the previous layer.
    let mut seed: u64 = 0x5DEECE66D;
    let mut next = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        seed >> 33
    };

    let mut deps_of: Vec<(String, Vec<String>)> = Vec::new();
    for layer in 0..4 {
        for slot in 0..4 {
            let name = format!("t{}-{}", layer, slot);
            let mut deps = Vec::new();
            if layer > 0 {
                for candidate in 0..4 {
                    if next() % 2 == 0 {
                        deps.push(format!("t{}-{}", layer - 1, candidate));
                    }
                }
            }
            deps_of.push((name, deps));
        }
    }

    for (name, deps) in &deps_of {
        orchestrator
            .submit(TaskSpec::new(name.as_str(), name.clone()).depends_on(deps.clone()))
            .await
            .unwrap();
    }
    for (name, _) in &deps_of {
        orchestrator
            .wait_for(&name.as_str().into(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
    }

    let order = log.lock().unwrap().clone();
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    for (name, deps) in &deps_of {
        let snapshot = orchestrator.status(&name.as_str().into()).await.unwrap();
        let started = snapshot.started_at.unwrap();
        for dep in deps {
            assert!(
                position(dep) < position(name),
                "{} started before its dependency {}",
                name,
                dep
            );
            let dep_snapshot = orchestrator.status(&dep.as_str().into()).await.unwrap();
            assert!(
                dep_snapshot.completed_at.unwrap() <= started,
                "{} started before its dependency {} completed",
                name,
                dep
            );
        }
    }
    orchestrator.stop().await.unwrap();
}

/// Completing metrics: submitted and completed counters line up with the
/// state distribution.
#[tokio::test]
async fn test_metrics_after_run() {
    let orchestrator = Orchestrator::new(fast_config(), sleeper(Duration::from_millis(10)));
    orchestrator.start().await.unwrap();

    for i in 0..3 {
        orchestrator
            .submit(TaskSpec::new(format!("task-{}", i), "x".to_string()))
            .await
            .unwrap();
    }
    for i in 0..3 {
        orchestrator
            .wait_for(&format!("task-{}", i).into(), Some(Duration::from_secs(2)))
            .await
            .unwrap();
    }

    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.counters.submitted, 3);
    assert_eq!(metrics.counters.completed, 3);
    assert_eq!(metrics.counters.failed, 0);
    assert_eq!(metrics.states.get("completed"), Some(&3));
    orchestrator.stop().await.unwrap();
}
