//! Episode recorder
//!
//! Sweeps rated-but-unprocessed tasks and asks the synthesis model whether
//! each piece of feedback is a reusable signal. Capturable feedback becomes
//! an episode; infrastructure gripes and one-off requests are skipped. Both
//! outcomes flip the task's processed flag so every rating is evaluated at
//! most once. Transport and parse failures leave the flag untouched, which
//! retries the task on the next sweep.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::LearningConfig;
use crate::error::{DroverError, DroverResult};
use crate::llm::SynthesisClient;
use crate::store::{TaskFilter, TaskStore};
use crate::types::{EpisodeDraft, FeedbackType, MessageAuthor, Task, ThreadMessage};
use crate::utils::extract_object;

const CAPTURE_SYSTEM_PROMPT: &str = "You judge whether one piece of user feedback on a \
completed task is worth remembering as a reusable preference. Complaints about the \
execution machinery (timeouts, crashes, the agent misbehaving) and one-off requirements \
that only apply to this single task are not reusable. Reply with exactly one JSON object:\n\
{\"capture\": true|false, \"narrative\": \"third-person summary of what the user wants, \
one or two sentences\", \"feedbackType\": \"approval\"|\"correction\"|\"rejection\", \
\"projectType\": \"kebab-case tag or null\", \"workContext\": \"short label for the kind \
of work\", \"tags\": [\"lowercase\", \"tags\"]}\n\
When capture is false the other fields may be empty. No text outside the object.";

/// Turns rated tasks into episode records via a synthesis verdict.
pub struct EpisodeRecorder {
    store: Arc<dyn TaskStore>,
    synthesis: Arc<dyn SynthesisClient>,
    config: LearningConfig,
}

impl EpisodeRecorder {
    pub fn new(
        store: Arc<dyn TaskStore>,
        synthesis: Arc<dyn SynthesisClient>,
        config: LearningConfig,
    ) -> Self {
        Self {
            store,
            synthesis,
            config,
        }
    }

    /// Periodic sweep loop. Runs until `shutdown` fires; failures are logged
    /// and retried on the next tick rather than propagated.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.recorder_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_once().await {
                Ok(0) => {}
                Ok(recorded) => tracing::info!(recorded, "feedback sweep captured episodes"),
                Err(error) => tracing::warn!(%error, "feedback sweep failed"),
            }
        }
        tracing::debug!("episode recorder stopped");
    }

    /// One sweep over every rated-unprocessed task. Returns how many
    /// episodes were recorded. Individual task failures are logged and
    /// skipped so one bad evaluation cannot wedge the queue behind it.
    pub async fn run_once(&self) -> DroverResult<usize> {
        let tasks = self.store.list_tasks(&TaskFilter::rated_unprocessed()).await?;
        let mut recorded = 0;
        for task in &tasks {
            match self.evaluate_task(task).await {
                Ok(true) => recorded += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(
                        task_id = %task.id,
                        %error,
                        "feedback evaluation failed, task stays unprocessed"
                    );
                }
            }
        }
        Ok(recorded)
    }

    /// Evaluate one task's feedback. Returns true when an episode was
    /// recorded. A non-capturable verdict marks the task processed with no
    /// episode; an unusable verdict is an error and leaves the task for the
    /// next sweep.
    async fn evaluate_task(&self, task: &Task) -> DroverResult<bool> {
        let messages = self.store.list_thread_messages(&task.id).await?;
        let prompt = build_capture_prompt(task, &messages);
        let response = self.synthesis.complete(CAPTURE_SYSTEM_PROMPT, &prompt).await?;

        let Some(verdict) = CaptureVerdict::parse(&response) else {
            return Err(DroverError::parse(format!(
                "no capture verdict in synthesis response for task {}",
                task.id
            )));
        };

        if !verdict.capture {
            self.store.mark_feedback_processed(&task.id).await?;
            tracing::debug!(task_id = %task.id, "feedback not capturable, marked processed");
            return Ok(false);
        }

        let narrative = verdict.narrative.trim();
        if narrative.is_empty() {
            return Err(DroverError::parse(format!(
                "capture verdict for task {} has no narrative",
                task.id
            )));
        }

        let draft = EpisodeDraft {
            task_id: task.id.clone(),
            narrative: narrative.to_string(),
            feedback_type: verdict
                .feedback_type
                .unwrap_or_else(|| FeedbackType::from_rating(task.rating.unwrap_or(3))),
            project_type: verdict.project_type,
            project_path: task.project_path.clone(),
            work_context: verdict.work_context.unwrap_or_default(),
            tags: verdict.tags,
        };
        let episode_id = self.store.record_episode(draft).await?;
        tracing::info!(
            task_id = %task.id,
            episode_id = %episode_id,
            "captured feedback episode"
        );
        Ok(true)
    }
}

fn build_capture_prompt(task: &Task, messages: &[ThreadMessage]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("Task: {} [{}]\n", task.title, task.task_type));
    if !task.description.is_empty() {
        prompt.push_str(&format!("Description: {}\n", task.description));
    }
    if let Some(rating) = task.rating {
        prompt.push_str(&format!("Rating: {rating}/5\n"));
    }
    if !task.rating_tags.is_empty() {
        prompt.push_str(&format!("Rating tags: {}\n", task.rating_tags.join(", ")));
    }
    if let Some(comment) = &task.rating_comment {
        prompt.push_str(&format!("Comment: {comment}\n"));
    }
    let user_messages: Vec<&ThreadMessage> = messages
        .iter()
        .filter(|message| message.author == MessageAuthor::User)
        .collect();
    if !user_messages.is_empty() {
        prompt.push_str("User messages during the task:\n");
        for message in user_messages {
            prompt.push_str(&format!("- {}\n", message.body));
        }
    }
    prompt
}

/// The synthesis model's decision about one piece of feedback.
#[derive(Debug)]
struct CaptureVerdict {
    capture: bool,
    narrative: String,
    feedback_type: Option<FeedbackType>,
    project_type: Option<String>,
    work_context: Option<String>,
    tags: Vec<String>,
}

impl CaptureVerdict {
    /// Best-effort extraction; requires an object with a boolean `capture`.
    fn parse(response: &str) -> Option<Self> {
        let value = extract_object(response)?;
        let capture = value.get("capture")?.as_bool()?;
        Some(Self {
            capture,
            narrative: value
                .get("narrative")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            feedback_type: value
                .get("feedbackType")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            project_type: value
                .get("projectType")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string),
            work_context: value
                .get("workContext")
                .and_then(Value::as_str)
                .map(str::to_string),
            tags: value
                .get("tags")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}
