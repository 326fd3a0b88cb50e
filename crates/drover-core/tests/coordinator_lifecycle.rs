//! End-to-end coordinator tests over the in-memory store: claim contention,
//! the poll loop, stale-claim recovery, and settlement edge cases.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use drover_core::classify::FailureKind;
use drover_core::config::{AgentConfig, CoordinatorConfig, LearningConfig};
use drover_core::coordinator::{Coordinator, recover_stale_tasks};
use drover_core::learning::RuleSelector;
use drover_core::store::{MemoryStore, TaskStore};
use drover_core::types::{Task, TaskId, TaskStatus, TaskType};

use support::FakeRunner;

fn coordinator(store: Arc<MemoryStore>, runner: Arc<FakeRunner>) -> Coordinator {
    let selector = Arc::new(RuleSelector::new(store.clone(), &LearningConfig::default()));
    Coordinator::new(
        store,
        runner,
        selector,
        CoordinatorConfig::default(),
        AgentConfig::default(),
    )
}

fn seed_pending(store: &MemoryStore, id: &str, title: &str) -> TaskId {
    let mut task = Task::new(title, "", TaskType::Feature);
    task.id = TaskId::from(id);
    store.insert_task(task);
    TaskId::from(id)
}

async fn wait_for_status(store: &MemoryStore, id: &TaskId, status: TaskStatus) -> Task {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let task = store.get_task(id).await.unwrap();
        if task.status == status {
            return task;
        }
        if Instant::now() >= deadline {
            panic!("task never reached {status}, still {}", task.status);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Test that two coordinators sharing a queue execute a task exactly once,
/// and that the claim stamp identifies the winner.
#[tokio::test]
async fn test_contending_coordinators_execute_a_task_once() {
    let store = Arc::new(MemoryStore::new());
    let runner_a = Arc::new(FakeRunner::new());
    let runner_b = Arc::new(FakeRunner::new());
    runner_a.push_success("Tightened the header and added a report-only rollout.");
    runner_b.push_success("Tightened the header and added a report-only rollout.");
    let id = seed_pending(&store, "t-contended", "Tighten the CSP header");

    let a = coordinator(store.clone(), runner_a.clone());
    let b = coordinator(store.clone(), runner_b.clone());
    let shutdown = CancellationToken::new();

    let (first, second) = tokio::join!(a.run_cycle(&shutdown), b.run_cycle(&shutdown));
    first.unwrap();
    second.unwrap();

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        runner_a.invocation_count() + runner_b.invocation_count(),
        1,
        "a claimed task must run on exactly one coordinator"
    );
    let winner = if runner_a.invocation_count() == 1 {
        a.instance_id()
    } else {
        b.instance_id()
    };
    assert_eq!(task.executor.as_deref(), Some(winner));
}

/// Test the poll loop end to end: a pending task is picked up without an
/// explicit cycle call, and the loop exits when the token fires.
#[tokio::test]
async fn test_run_loop_picks_up_work_and_stops_on_cancel() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::new());
    runner.push_success("Renamed the flag and updated both call sites.");
    let id = seed_pending(&store, "t-loop", "Rename the beta feature flag");

    let config = CoordinatorConfig {
        poll_interval: Duration::from_millis(20),
        ..CoordinatorConfig::default()
    };
    let selector = Arc::new(RuleSelector::new(store.clone(), &LearningConfig::default()));
    let coordinator = Coordinator::new(
        store.clone(),
        runner,
        selector,
        config,
        AgentConfig::default(),
    );

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { coordinator.run(shutdown).await }
    });

    let task = wait_for_status(&store, &id, TaskStatus::Completed).await;
    assert_eq!(
        task.result.as_deref(),
        Some("Renamed the flag and updated both call sites.")
    );

    shutdown.cancel();
    handle.await.unwrap();
}

/// Test that an expired claim is returned to the queue and that the next
/// cycle can claim and finish the task.
#[tokio::test]
async fn test_stale_claim_is_recovered_and_reexecuted() {
    let store = Arc::new(MemoryStore::new());
    let mut task = Task::new("Migrate the cron jobs", "", TaskType::Chore);
    task.id = TaskId::from("t-stale");
    task.status = TaskStatus::InProgress;
    task.executor = Some("drover-gone".to_string());
    task.started_at = Some(Utc::now() - chrono::Duration::hours(2));
    store.insert_task(task);

    let recovered = recover_stale_tasks(store.as_ref(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(recovered, 1);

    let task = store.get_task(&TaskId::from("t-stale")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.executor.is_none());
    assert!(task.started_at.is_none());

    let runner = Arc::new(FakeRunner::new());
    runner.push_success("Moved the jobs to systemd timers.");
    let coordinator = coordinator(store.clone(), runner);
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let task = store.get_task(&TaskId::from("t-stale")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

/// Test that a task the agent completed through its own store channel keeps
/// the agent's status and result; the subprocess tail is discarded.
#[tokio::test]
async fn test_agent_settled_task_is_not_overwritten() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::new());
    runner.push_success("tail output that must not become the result");
    let id = seed_pending(&store, "t-self", "Write the release notes");

    let hook_store = store.clone();
    runner.on_invocation(move |invocation| {
        let mut task = Task::new("Write the release notes", "", TaskType::Feature);
        task.id = invocation.task_id.clone();
        task.status = TaskStatus::Completed;
        task.result = Some("agent-written summary".to_string());
        hook_store.insert_task(task);
    });

    let coordinator = coordinator(store.clone(), runner);
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some("agent-written summary"));
}

/// Test that an out-of-memory crash lands in the task record with the right
/// failure category.
#[tokio::test]
async fn test_oom_failure_is_classified_and_recorded() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::new());
    runner.push_failure(
        1,
        "FATAL ERROR: Reached heap limit Allocation failed - JavaScript heap out of memory",
    );
    let id = seed_pending(&store, "t-oom", "Bundle the documentation site");

    let coordinator = coordinator(store.clone(), runner);
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_kind, Some(FailureKind::Oom));
    assert!(
        task.error_message
            .as_deref()
            .unwrap_or("")
            .contains("heap limit")
    );
}

/// Test that a runner that cannot even launch the agent fails the task as a
/// dependency problem rather than leaving it claimed.
#[tokio::test]
async fn test_missing_agent_binary_fails_as_dependency_error() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::new());
    runner.push_spawn_error("No such file or directory (os error 2)");
    let id = seed_pending(&store, "t-spawn", "Refresh the API docs");

    let coordinator = coordinator(store.clone(), runner);
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_kind, Some(FailureKind::DependencyError));
    assert!(
        task.error_message
            .as_deref()
            .unwrap_or("")
            .contains("Failed to launch agent")
    );
}
