//! Episode records: captured human feedback moments

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::TaskId;

/// Identifier of an episode record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(String);

impl EpisodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EpisodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EpisodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What kind of signal the human gave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Correction,
    Approval,
    Rejection,
}

impl FeedbackType {
    /// Fallback classification when the synthesis verdict omits a type.
    /// Ratings run 1 to 5.
    pub fn from_rating(rating: i32) -> Self {
        if rating >= 4 {
            Self::Approval
        } else if rating <= 2 {
            Self::Rejection
        } else {
            Self::Correction
        }
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Correction => "correction",
            Self::Approval => "approval",
            Self::Rejection => "rejection",
        };
        f.write_str(label)
    }
}

/// An immutable narrative record of one human feedback moment.
///
/// Created once by the episode recorder; the `distilled` flag flips true
/// exactly once when the distillation engine consumes it. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Episode {
    pub id: EpisodeId,
    pub task_id: TaskId,
    pub narrative: String,
    pub feedback_type: FeedbackType,
    pub project_type: Option<String>,
    pub project_path: Option<PathBuf>,
    pub work_context: String,
    pub tags: Vec<String>,
    pub distilled: bool,
    pub created_at: DateTime<Utc>,
}

impl Default for Episode {
    fn default() -> Self {
        Self {
            id: EpisodeId::generate(),
            task_id: TaskId::from(""),
            narrative: String::new(),
            feedback_type: FeedbackType::Correction,
            project_type: None,
            project_path: None,
            work_context: String::new(),
            tags: Vec::new(),
            distilled: false,
            created_at: Utc::now(),
        }
    }
}

/// Episode fields supplied by the recorder; the store assigns the id and
/// flips the source task's processed flag in the same write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeDraft {
    pub task_id: TaskId,
    pub narrative: String,
    pub feedback_type: FeedbackType,
    pub project_type: Option<String>,
    pub project_path: Option<PathBuf>,
    pub work_context: String,
    pub tags: Vec<String>,
}

impl EpisodeDraft {
    /// Materialize a full episode record (memory store).
    pub fn into_episode(self, id: EpisodeId) -> Episode {
        Episode {
            id,
            task_id: self.task_id,
            narrative: self.narrative,
            feedback_type: self.feedback_type,
            project_type: self.project_type,
            project_path: self.project_path,
            work_context: self.work_context,
            tags: self.tags,
            distilled: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_type_from_rating() {
        assert_eq!(FeedbackType::from_rating(5), FeedbackType::Approval);
        assert_eq!(FeedbackType::from_rating(4), FeedbackType::Approval);
        assert_eq!(FeedbackType::from_rating(3), FeedbackType::Correction);
        assert_eq!(FeedbackType::from_rating(2), FeedbackType::Rejection);
        assert_eq!(FeedbackType::from_rating(1), FeedbackType::Rejection);
    }

    #[test]
    fn test_draft_materializes_undistilled() {
        let draft = EpisodeDraft {
            task_id: TaskId::from("t1"),
            narrative: "User prefers warm, muted color palettes".to_string(),
            feedback_type: FeedbackType::Approval,
            project_type: Some("landing-page".to_string()),
            project_path: None,
            work_context: "visual design".to_string(),
            tags: vec!["design".to_string()],
        };
        let episode = draft.into_episode(EpisodeId::from("e1"));
        assert!(!episode.distilled);
        assert_eq!(episode.id.as_str(), "e1");
        assert_eq!(episode.feedback_type, FeedbackType::Approval);
    }
}
