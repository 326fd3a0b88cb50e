//! Persisted data model: tasks, thread messages, episodes, and rules
//!
//! These types mirror the records held by the shared task store. The store is
//! the sole owner of persisted state; everything here is a transient view
//! fetched per poll cycle.

pub mod episode;
pub mod rule;
pub mod task;

pub use episode::{Episode, EpisodeDraft, EpisodeId, FeedbackType};
pub use rule::{Confidence, Rule, RuleCategory, RuleDraft, RuleId, RuleScope};
pub use task::{
    Assumption, IdeaVariant, MessageAuthor, Task, TaskId, TaskStatus, TaskType, ThreadMessage,
    WorkflowStatus,
};
