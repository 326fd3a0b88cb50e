//! Idea workflow tests driven through the coordinator: claiming routes by
//! task type, re-entry legs resume from externally set workflow status, and
//! each round's structured report lands back on the task.

mod support;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drover_core::classify::FailureKind;
use drover_core::config::{AgentConfig, CoordinatorConfig, LearningConfig};
use drover_core::coordinator::Coordinator;
use drover_core::learning::RuleSelector;
use drover_core::store::{MemoryStore, TaskStore};
use drover_core::types::{
    Confidence, Rule, Task, TaskId, TaskStatus, TaskType, WorkflowStatus,
};

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

fn seed_idea(store: &MemoryStore, id: &str) -> TaskId {
    let mut task = Task::new(
        "Playful 404 page",
        "Something memorable instead of the stock error",
        TaskType::Idea,
    );
    task.id = TaskId::from(id);
    store.insert_task(task);
    TaskId::from(id)
}

const INITIAL_BLOCK: &str = "Explored two directions for the page.\n\
```json\n\
{\"assumptions\": [{\"key\": \"tone\", \"value\": \"playful but on-brand\"}], \
\"variants\": [\
{\"name\": \"Static mascot\", \"description\": \"single illustration\", \"pros\": [\"tiny\"], \"cons\": []}, \
{\"name\": \"Animated mascot\", \"description\": \"lottie animation\", \"pros\": [\"memorable\"], \"cons\": [\"heavy\"]}\
]}\n\
```\n";

/// Test that a pending idea task is claimed, routed through the workflow,
/// and parks awaiting feedback with the round's proposals stored. Learned
/// preferences are part of the idea prompt like any other execution.
#[tokio::test]
async fn test_idea_task_routes_through_workflow() {
    let store = Arc::new(MemoryStore::new());
    store.insert_rule(Rule {
        content: "Prefer system fonts over webfonts".to_string(),
        confidence: Confidence::new(0.9),
        ..Rule::default()
    });
    let runner = Arc::new(FakeRunner::new());
    runner.push_success(INITIAL_BLOCK);
    let id = seed_idea(&store, "i-1");

    let coordinator = coordinator(store.clone(), runner.clone());
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::AwaitingFeedback);
    assert_eq!(task.workflow_status, WorkflowStatus::AwaitingFeedback);
    assert_eq!(task.variants.len(), 2);
    assert_eq!(task.variants[0].name, "Static mascot");
    assert_eq!(task.assumptions.len(), 1);
    assert!(task.result.is_some());

    let prompts = runner.prompts();
    assert!(prompts[0].contains("2-4 distinct variants"));
    assert!(prompts[0].contains("## Learned preferences"));
    assert!(prompts[0].contains("Prefer system fonts over webfonts"));
}

/// Test a full feedback round trip: initial leg, user feedback re-entry,
/// and a revised report replacing the proposals while the feedback itself
/// is preserved.
#[tokio::test]
async fn test_feedback_round_trip_over_two_cycles() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::new());
    let id = seed_idea(&store, "i-2");
    let coordinator = coordinator(store.clone(), runner.clone());

    runner.push_success(INITIAL_BLOCK);
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    // The user reviews the round, leaves a correction, and requeues the task.
    let mut task = store.get_task(&id).await.unwrap();
    task.status = TaskStatus::Pending;
    task.workflow_status = WorkflowStatus::PendingFeedback;
    task.user_feedback = Some("Drop the animation, keep it lightweight".to_string());
    store.insert_task(task);

    runner.push_success(
        "Reworked it without motion.\n\
```json\n\
{\"assumptions\": [{\"key\": \"weight\", \"value\": \"no animation budget\"}], \
\"variants\": [{\"name\": \"Static mascot\", \"description\": \"single SVG, no motion\", \"pros\": [\"tiny\"], \"cons\": []}], \
\"selectedVariantIndex\": 0, \"epicId\": \"epic-404\"}\n\
```\n",
    );
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let prompts = runner.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("> Drop the animation, keep it lightweight"));
    assert!(prompts[1].contains("Variants proposed last round:"));
    assert!(prompts[1].contains("0. Static mascot"));

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::AwaitingFeedback);
    assert_eq!(task.variants.len(), 1);
    assert_eq!(task.selected_variant_index, Some(0));
    assert_eq!(task.epic_id.as_deref(), Some("epic-404"));
    assert_eq!(
        task.user_feedback.as_deref(),
        Some("Drop the animation, keep it lightweight")
    );
}

/// Test that a crash during a variant build-out leaves the workflow
/// terminally failed rather than looping.
#[tokio::test]
async fn test_variant_leg_crash_is_terminal() {
    let store = Arc::new(MemoryStore::new());
    let runner = Arc::new(FakeRunner::new());
    let id = seed_idea(&store, "i-3");

    let mut task = store.get_task(&id).await.unwrap();
    task.workflow_status = WorkflowStatus::PendingVariant;
    task.selected_variant_index = Some(1);
    store.insert_task(task);

    runner.push_failure(101, "thread 'main' panicked at src/render.rs:42");
    let coordinator = coordinator(store.clone(), runner.clone());
    coordinator
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    let task = store.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.workflow_status, WorkflowStatus::Failed);
    assert_eq!(task.failure_kind, Some(FailureKind::Crash));
    assert!(
        task.error_message
            .as_deref()
            .unwrap_or("")
            .contains("panicked")
    );
    assert!(runner.prompts()[0].contains("chose variant 1"));
}
