//! Task records and their lifecycle vocabulary

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::FailureKind;

/// Identifier of a task record in the shared store.
///
/// Stores issue their own ids, so this is an opaque string rather than a
/// structured id type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh id (used by the memory store and tests).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    AwaitingFeedback,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Category of requested work. Unknown categories deserialize as `Other` so
/// upstream producers can add types without breaking the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Bug,
    Feature,
    Chore,
    Research,
    Writing,
    Project,
    Idea,
    #[serde(other)]
    Other,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Chore => "chore",
            Self::Research => "research",
            Self::Writing => "writing",
            Self::Project => "project",
            Self::Idea => "idea",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// Position of an idea task inside its multi-turn workflow.
///
/// `PendingVariant` and `PendingFeedback` are set externally (the user picked
/// a variant or typed a correction) and consumed by the workflow on the next
/// claim; `Failed` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    None,
    Running,
    AwaitingFeedback,
    PendingVariant,
    PendingFeedback,
    Failed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Running => "running",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::PendingVariant => "pending_variant",
            Self::PendingFeedback => "pending_feedback",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One assumption the agent surfaced while exploring an idea.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assumption {
    pub key: String,
    pub value: String,
}

/// One alternative approach the agent discovered for an idea task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaVariant {
    pub name: String,
    pub description: String,
    pub pros: Vec<String>,
    pub cons: Vec<String>,
}

impl Default for IdeaVariant {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            pros: Vec::new(),
            cons: Vec::new(),
        }
    }
}

/// A unit of requested work, as stored in the shared task store.
///
/// Wire format uses camelCase field names to match the store's JSON protocol.
/// Every collection and flag field carries a serde default so partially
/// populated records from older producers still deserialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub subtype: Option<String>,
    pub status: TaskStatus,
    pub project_path: Option<PathBuf>,
    /// Idempotency key, unique per originating upstream event.
    pub ingest_key: Option<String>,
    /// Instance id of the coordinator currently holding the claim.
    pub executor: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// Cooperative cancellation flag, set externally and read at checkpoints.
    pub cancel_requested: bool,
    pub rating: Option<i32>,
    pub rating_tags: Vec<String>,
    pub rating_comment: Option<String>,
    /// Flipped by the episode recorder; guarantees at-most-once evaluation.
    pub feedback_processed: bool,
    pub workflow_status: WorkflowStatus,
    pub assumptions: Vec<Assumption>,
    pub variants: Vec<IdeaVariant>,
    pub selected_variant_index: Option<usize>,
    pub user_feedback: Option<String>,
    pub epic_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Task {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            title: String::new(),
            description: String::new(),
            task_type: TaskType::Other,
            subtype: None,
            status: TaskStatus::Pending,
            project_path: None,
            ingest_key: None,
            executor: None,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            failure_kind: None,
            cancel_requested: false,
            rating: None,
            rating_tags: Vec::new(),
            rating_comment: None,
            feedback_processed: false,
            workflow_status: WorkflowStatus::None,
            assumptions: Vec::new(),
            variants: Vec::new(),
            selected_variant_index: None,
            user_feedback: None,
            epic_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        task_type: TaskType,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            task_type,
            ..Self::default()
        }
    }

    /// Builder-style project path.
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Builder-style subtype.
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Builder-style ingest key.
    pub fn with_ingest_key(mut self, key: impl Into<String>) -> Self {
        self.ingest_key = Some(key.into());
        self
    }

    /// Deterministic idempotency key for a task extracted from an upstream
    /// event. Re-processing the same event reproduces the same keys, and the
    /// store's uniqueness constraint rejects the duplicates.
    pub fn ingest_key_for(event_id: &str, ordinal: usize) -> String {
        format!("{event_id}:{ordinal}")
    }

    /// Idea tasks route through the multi-turn workflow instead of the
    /// standard execute path.
    pub fn is_idea(&self) -> bool {
        matches!(self.task_type, TaskType::Idea)
    }
}

/// Author of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageAuthor {
    User,
    Agent,
}

/// One message in a task's conversation thread. The agent and the UI write
/// these; the core only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub id: String,
    pub task_id: TaskId,
    pub author: MessageAuthor,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn new(task_id: TaskId, author: MessageAuthor, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            author,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}
