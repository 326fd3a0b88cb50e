//! Shared task store interface
//!
//! The store is external and multi-writer: the UI, the execution agent, and
//! upstream task producers all mutate the same records. The core consumes it
//! through a deliberately narrow trait: snapshot queries, single-record
//! patches, one conditional update primitive, and one create-with-link
//! write. Mutual exclusion is built on the conditional update, not on store
//! locks.

pub mod http;
pub mod memory;

pub use http::HttpStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::FailureKind;
use crate::types::{
    Assumption, Confidence, Episode, EpisodeDraft, EpisodeId, IdeaVariant, Rule, RuleDraft,
    RuleId, Task, TaskId, TaskStatus, ThreadMessage, WorkflowStatus,
};

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store-facing error taxonomy. Poll loops treat `Unavailable` as transient
/// and retry on the next cycle; the rest surface per-record.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The store could not be reached or timed out
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The requested record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A create collided with an existing ingest key
    #[error("Duplicate ingest key: {0}")]
    DuplicateKey(String),

    /// A stored record failed to deserialize
    #[error("Malformed record {id}: {message}")]
    Malformed { id: String, message: String },

    /// The store answered outside its protocol
    #[error("Store protocol error: {0}")]
    Protocol(String),
}

/// Snapshot query over tasks. All conditions are conjunctive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub started_before: Option<DateTime<Utc>>,
    /// Tasks carrying a rating whose feedback has not been evaluated yet.
    pub rated_unprocessed: bool,
    pub limit: Option<usize>,
}

impl TaskFilter {
    /// Tasks waiting to be claimed.
    pub fn pending() -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            ..Self::default()
        }
    }

    /// In-progress tasks whose claim is older than `cutoff`.
    pub fn stale_in_progress(cutoff: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            started_before: Some(cutoff),
            ..Self::default()
        }
    }

    /// Rated tasks the episode recorder has not evaluated.
    pub fn rated_unprocessed() -> Self {
        Self {
            rated_unprocessed: true,
            ..Self::default()
        }
    }

    /// Whether a task satisfies every condition of this filter.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(cutoff) = self.started_before {
            match task.started_at {
                Some(started) if started < cutoff => {}
                _ => return false,
            }
        }
        if self.rated_unprocessed && (task.rating.is_none() || task.feedback_processed) {
            return false;
        }
        true
    }
}

/// Sparse task mutation. Unset fields are left alone; the `clear_*` flags
/// express "set to null", which an `Option` field cannot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub executor: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub workflow_status: Option<WorkflowStatus>,
    pub assumptions: Option<Vec<Assumption>>,
    pub variants: Option<Vec<IdeaVariant>>,
    pub selected_variant_index: Option<usize>,
    pub epic_id: Option<String>,
    pub clear_executor: bool,
    pub clear_started_at: bool,
    pub clear_result: bool,
    pub clear_error_message: bool,
}

impl TaskPatch {
    /// Claim a pending task: stamp the executor and start time, and clear
    /// leftovers from any earlier attempt.
    pub fn claim(executor: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            executor: Some(executor.into()),
            started_at: Some(now),
            clear_result: true,
            clear_error_message: true,
            ..Self::default()
        }
    }

    /// Return a stale claim to the queue.
    pub fn release() -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            clear_executor: true,
            clear_started_at: true,
            ..Self::default()
        }
    }

    /// Terminal success.
    pub fn completed(result: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            completed_at: Some(now),
            result,
            ..Self::default()
        }
    }

    /// Terminal failure with a classified cause.
    pub fn failed(kind: FailureKind, message: String, now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            completed_at: Some(now),
            error_message: Some(message),
            failure_kind: Some(kind),
            ..Self::default()
        }
    }

    /// Terminal user cancellation.
    pub fn cancelled(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(TaskStatus::Cancelled),
            completed_at: Some(now),
            failure_kind: Some(FailureKind::Cancelled),
            ..Self::default()
        }
    }

    /// Apply this patch to an in-memory record. Sets are applied before
    /// clears; `updated_at` always advances.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(executor) = &self.executor {
            task.executor = Some(executor.clone());
        }
        if let Some(started_at) = self.started_at {
            task.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            task.completed_at = Some(completed_at);
        }
        if let Some(result) = &self.result {
            task.result = Some(result.clone());
        }
        if let Some(error_message) = &self.error_message {
            task.error_message = Some(error_message.clone());
        }
        if let Some(failure_kind) = self.failure_kind {
            task.failure_kind = Some(failure_kind);
        }
        if let Some(workflow_status) = self.workflow_status {
            task.workflow_status = workflow_status;
        }
        if let Some(assumptions) = &self.assumptions {
            task.assumptions = assumptions.clone();
        }
        if let Some(variants) = &self.variants {
            task.variants = variants.clone();
        }
        if let Some(index) = self.selected_variant_index {
            task.selected_variant_index = Some(index);
        }
        if let Some(epic_id) = &self.epic_id {
            task.epic_id = Some(epic_id.clone());
        }
        if self.clear_executor {
            task.executor = None;
        }
        if self.clear_started_at {
            task.started_at = None;
        }
        if self.clear_result {
            task.result = None;
        }
        if self.clear_error_message {
            task.error_message = None;
        }
        task.updated_at = Utc::now();
    }
}

/// Sparse rule mutation. `add_conflicts_with` merges into the existing link
/// set rather than replacing it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleUpdate {
    pub confidence: Option<Confidence>,
    pub support_count: Option<usize>,
    pub source_episode_ids: Option<Vec<EpisodeId>>,
    pub add_conflicts_with: Vec<RuleId>,
    pub active: Option<bool>,
}

impl RuleUpdate {
    pub fn apply_to(&self, rule: &mut Rule) {
        if let Some(confidence) = self.confidence {
            rule.confidence = confidence;
        }
        if let Some(support_count) = self.support_count {
            rule.support_count = support_count;
        }
        if let Some(ids) = &self.source_episode_ids {
            rule.source_episode_ids = ids.clone();
        }
        for id in &self.add_conflicts_with {
            if !rule.conflicts_with.contains(id) {
                rule.conflicts_with.push(id.clone());
            }
        }
        if let Some(active) = self.active {
            rule.active = active;
        }
        rule.updated_at = Utc::now();
    }
}

/// Narrow transactional interface to the shared task store.
///
/// Two methods carry the correctness-critical semantics:
/// [`update_task_if_status`](TaskStore::update_task_if_status) is the
/// conditional update the claim protocol is built on, and
/// [`record_episode`](TaskStore::record_episode) creates an episode and
/// flips the source task's processed flag in one write.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, id: &TaskId) -> StoreResult<Task>;

    /// Snapshot query; results are ordered oldest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;

    /// Create a task, rejecting duplicates of its ingest key with
    /// [`StoreError::DuplicateKey`].
    async fn create_task(&self, task: Task) -> StoreResult<TaskId>;

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> StoreResult<()>;

    /// Apply `patch` only while the task's status equals `expected`.
    /// Returns false when the condition no longer holds (a lost race).
    async fn update_task_if_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        patch: TaskPatch,
    ) -> StoreResult<bool>;

    async fn list_thread_messages(&self, task_id: &TaskId) -> StoreResult<Vec<ThreadMessage>>;

    /// Create an episode and mark its source task's feedback processed in
    /// the same write.
    async fn record_episode(&self, draft: EpisodeDraft) -> StoreResult<EpisodeId>;

    /// Mark a task's feedback evaluated without creating an episode
    /// (non-capturable verdicts).
    async fn mark_feedback_processed(&self, task_id: &TaskId) -> StoreResult<()>;

    async fn list_undistilled_episodes(&self) -> StoreResult<Vec<Episode>>;

    /// Flip the distilled flag on a consumed batch. Ids that no longer
    /// resolve are skipped, which keeps the call idempotent.
    async fn mark_episodes_distilled(&self, ids: &[EpisodeId]) -> StoreResult<()>;

    async fn create_rule(&self, draft: RuleDraft) -> StoreResult<RuleId>;

    async fn update_rule(&self, id: &RuleId, update: RuleUpdate) -> StoreResult<()>;

    async fn list_active_rules(&self) -> StoreResult<Vec<Rule>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskType;

    #[test]
    fn test_filter_matches_status_and_claim_age() {
        let mut task = Task::new("t", "", TaskType::Feature);
        assert!(TaskFilter::pending().matches(&task));

        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now() - chrono::Duration::hours(2));
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert!(TaskFilter::stale_in_progress(cutoff).matches(&task));

        task.started_at = Some(Utc::now());
        assert!(!TaskFilter::stale_in_progress(cutoff).matches(&task));
    }

    #[test]
    fn test_filter_rated_unprocessed() {
        let mut task = Task::new("t", "", TaskType::Feature);
        assert!(!TaskFilter::rated_unprocessed().matches(&task));

        task.rating = Some(5);
        assert!(TaskFilter::rated_unprocessed().matches(&task));

        task.feedback_processed = true;
        assert!(!TaskFilter::rated_unprocessed().matches(&task));
    }

    #[test]
    fn test_claim_patch_clears_previous_attempt() {
        let mut task = Task::new("t", "", TaskType::Feature);
        task.result = Some("stale result".to_string());
        task.error_message = Some("stale error".to_string());

        TaskPatch::claim("drover-a", Utc::now()).apply_to(&mut task);

        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.executor.as_deref(), Some("drover-a"));
        assert!(task.started_at.is_some());
        assert!(task.result.is_none());
        assert!(task.error_message.is_none());
    }

    #[test]
    fn test_release_patch_clears_claim_fields() {
        let mut task = Task::new("t", "", TaskType::Feature);
        TaskPatch::claim("drover-a", Utc::now()).apply_to(&mut task);
        TaskPatch::release().apply_to(&mut task);

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.executor.is_none());
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_rule_update_merges_conflict_links() {
        let mut rule = Rule::default();
        rule.conflicts_with = vec![RuleId::from("r1")];

        let update = RuleUpdate {
            add_conflicts_with: vec![RuleId::from("r1"), RuleId::from("r2")],
            ..RuleUpdate::default()
        };
        update.apply_to(&mut rule);

        assert_eq!(rule.conflicts_with.len(), 2);
    }
}
