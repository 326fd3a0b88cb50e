//! In-memory task store
//!
//! Backs local runs and tests. A single lock around all collections makes
//! the conditional update and the episode-plus-flag write genuinely atomic,
//! which is exactly the semantics the claim protocol assumes of a real
//! store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::store::{RuleUpdate, StoreError, StoreResult, TaskFilter, TaskPatch, TaskStore};
use crate::types::{
    Episode, EpisodeDraft, EpisodeId, Rule, RuleDraft, RuleId, Task, TaskId, TaskStatus,
    ThreadMessage,
};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    messages: HashMap<String, Vec<ThreadMessage>>,
    episodes: HashMap<String, Episode>,
    rules: HashMap<String, Rule>,
    ingest_keys: HashSet<String>,
}

/// In-process implementation of [`TaskStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task, bypassing ingest-key checks. Seeding hook
    /// for tests and local mode; also how tests simulate external writers
    /// (the UI setting a rating, the agent moving a task itself).
    pub fn insert_task(&self, task: Task) {
        let mut inner = self.inner.write();
        if let Some(key) = &task.ingest_key {
            inner.ingest_keys.insert(key.clone());
        }
        inner.tasks.insert(task.id.as_str().to_string(), task);
    }

    pub fn insert_episode(&self, episode: Episode) {
        let mut inner = self.inner.write();
        inner
            .episodes
            .insert(episode.id.as_str().to_string(), episode);
    }

    pub fn insert_rule(&self, rule: Rule) {
        let mut inner = self.inner.write();
        inner.rules.insert(rule.id.as_str().to_string(), rule);
    }

    pub fn add_thread_message(&self, message: ThreadMessage) {
        let mut inner = self.inner.write();
        inner
            .messages
            .entry(message.task_id.as_str().to_string())
            .or_default()
            .push(message);
    }

    /// Snapshot of all episodes, oldest first. Assertion helper.
    pub fn episodes(&self) -> Vec<Episode> {
        let inner = self.inner.read();
        let mut episodes: Vec<_> = inner.episodes.values().cloned().collect();
        episodes.sort_by_key(|episode| episode.created_at);
        episodes
    }

    /// Snapshot of all rules, oldest first. Assertion helper.
    pub fn rules(&self) -> Vec<Rule> {
        let inner = self.inner.read();
        let mut rules: Vec<_> = inner.rules.values().cloned().collect();
        rules.sort_by_key(|rule| rule.created_at);
        rules
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn get_task(&self, id: &TaskId) -> StoreResult<Task> {
        let inner = self.inner.read();
        inner
            .tasks
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let inner = self.inner.read();
        let mut tasks: Vec<_> = inner
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.created_at);
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn create_task(&self, task: Task) -> StoreResult<TaskId> {
        let mut inner = self.inner.write();
        if let Some(key) = &task.ingest_key {
            if !inner.ingest_keys.insert(key.clone()) {
                return Err(StoreError::DuplicateKey(key.clone()));
            }
        }
        let id = task.id.clone();
        inner.tasks.insert(id.as_str().to_string(), task);
        Ok(id)
    }

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply_to(task);
        Ok(())
    }

    async fn update_task_if_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        patch: TaskPatch,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if task.status != expected {
            return Ok(false);
        }
        patch.apply_to(task);
        Ok(true)
    }

    async fn list_thread_messages(&self, task_id: &TaskId) -> StoreResult<Vec<ThreadMessage>> {
        let inner = self.inner.read();
        let mut messages = inner
            .messages
            .get(task_id.as_str())
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|message| message.created_at);
        Ok(messages)
    }

    async fn record_episode(&self, draft: EpisodeDraft) -> StoreResult<EpisodeId> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(draft.task_id.as_str())
            .ok_or_else(|| StoreError::NotFound(draft.task_id.to_string()))?;
        task.feedback_processed = true;

        let id = EpisodeId::generate();
        let episode = draft.into_episode(id.clone());
        inner.episodes.insert(id.as_str().to_string(), episode);
        Ok(id)
    }

    async fn mark_feedback_processed(&self, task_id: &TaskId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let task = inner
            .tasks
            .get_mut(task_id.as_str())
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        task.feedback_processed = true;
        Ok(())
    }

    async fn list_undistilled_episodes(&self) -> StoreResult<Vec<Episode>> {
        let inner = self.inner.read();
        let mut episodes: Vec<_> = inner
            .episodes
            .values()
            .filter(|episode| !episode.distilled)
            .cloned()
            .collect();
        episodes.sort_by_key(|episode| episode.created_at);
        Ok(episodes)
    }

    async fn mark_episodes_distilled(&self, ids: &[EpisodeId]) -> StoreResult<()> {
        let mut inner = self.inner.write();
        for id in ids {
            if let Some(episode) = inner.episodes.get_mut(id.as_str()) {
                episode.distilled = true;
            }
        }
        Ok(())
    }

    async fn create_rule(&self, draft: RuleDraft) -> StoreResult<RuleId> {
        let mut inner = self.inner.write();
        let id = RuleId::generate();
        let rule = draft.into_rule(id.clone());
        inner.rules.insert(id.as_str().to_string(), rule);
        Ok(id)
    }

    async fn update_rule(&self, id: &RuleId, update: RuleUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let rule = inner
            .rules
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply_to(rule);
        Ok(())
    }

    async fn list_active_rules(&self) -> StoreResult<Vec<Rule>> {
        let inner = self.inner.read();
        let mut rules: Vec<_> = inner
            .rules
            .values()
            .filter(|rule| rule.active)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.created_at);
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeedbackType, MessageAuthor, TaskType};
    use chrono::Utc;

    fn draft_for(task_id: &TaskId) -> EpisodeDraft {
        EpisodeDraft {
            task_id: task_id.clone(),
            narrative: "User asked for system fonts instead of webfonts".to_string(),
            feedback_type: FeedbackType::Correction,
            project_type: None,
            project_path: None,
            work_context: "typography".to_string(),
            tags: vec!["design".to_string()],
        }
    }

    #[tokio::test]
    async fn test_create_task_rejects_duplicate_ingest_key() {
        let store = MemoryStore::new();
        let key = Task::ingest_key_for("evt_1", 0);

        let first = Task::new("a", "", TaskType::Feature).with_ingest_key(key.clone());
        store.create_task(first).await.unwrap();

        let second = Task::new("a again", "", TaskType::Feature).with_ingest_key(key);
        let error = store.create_task(second).await.unwrap_err();
        assert!(matches!(error, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_conditional_update_observes_status() {
        let store = MemoryStore::new();
        let task = Task::new("t", "", TaskType::Feature);
        let id = task.id.clone();
        store.insert_task(task);

        let claimed = store
            .update_task_if_status(&id, TaskStatus::Pending, TaskPatch::claim("a", Utc::now()))
            .await
            .unwrap();
        assert!(claimed);

        // Second claim sees in_progress and loses.
        let claimed = store
            .update_task_if_status(&id, TaskStatus::Pending, TaskPatch::claim("b", Utc::now()))
            .await
            .unwrap();
        assert!(!claimed);

        let task = store.get_task(&id).await.unwrap();
        assert_eq!(task.executor.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_record_episode_flips_processed_flag_atomically() {
        let store = MemoryStore::new();
        let mut task = Task::new("t", "", TaskType::Feature);
        task.rating = Some(2);
        let id = task.id.clone();
        store.insert_task(task);

        store.record_episode(draft_for(&id)).await.unwrap();

        let task = store.get_task(&id).await.unwrap();
        assert!(task.feedback_processed);
        assert_eq!(store.episodes().len(), 1);
        assert!(!store.episodes()[0].distilled);
    }

    #[tokio::test]
    async fn test_record_episode_for_missing_task_writes_nothing() {
        let store = MemoryStore::new();
        let error = store
            .record_episode(draft_for(&TaskId::from("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound(_)));
        assert!(store.episodes().is_empty());
    }

    #[tokio::test]
    async fn test_mark_episodes_distilled_is_idempotent() {
        let store = MemoryStore::new();
        let task = Task::new("t", "", TaskType::Feature);
        let task_id = task.id.clone();
        store.insert_task(task);
        let episode_id = store.record_episode(draft_for(&task_id)).await.unwrap();

        let ids = vec![episode_id, EpisodeId::from("no-longer-there")];
        store.mark_episodes_distilled(&ids).await.unwrap();
        store.mark_episodes_distilled(&ids).await.unwrap();

        assert!(store.episodes()[0].distilled);
        assert!(store.list_undistilled_episodes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_tasks_orders_oldest_first_and_limits() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut task = Task::new(format!("t{i}"), "", TaskType::Feature);
            task.created_at = Utc::now() - chrono::Duration::minutes(5 - i);
            store.insert_task(task);
        }

        let filter = TaskFilter {
            limit: Some(3),
            ..TaskFilter::pending()
        };
        let tasks = store.list_tasks(&filter).await.unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].title, "t0");
        assert_eq!(tasks[2].title, "t2");
    }

    #[tokio::test]
    async fn test_thread_messages_ordered_by_time() {
        let store = MemoryStore::new();
        let task = Task::new("t", "", TaskType::Feature);
        let id = task.id.clone();
        store.insert_task(task);

        let mut early = ThreadMessage::new(id.clone(), MessageAuthor::User, "first");
        early.created_at = Utc::now() - chrono::Duration::minutes(2);
        let late = ThreadMessage::new(id.clone(), MessageAuthor::Agent, "second");
        store.add_thread_message(late);
        store.add_thread_message(early);

        let messages = store.list_thread_messages(&id).await.unwrap();
        assert_eq!(messages[0].body, "first");
        assert_eq!(messages[1].body, "second");
    }
}
