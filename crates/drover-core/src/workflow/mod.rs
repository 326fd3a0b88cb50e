//! Idea workflow state machine
//!
//! Idea tasks run a multi-turn loop instead of one-shot execution:
//! `none -> running -> awaiting_feedback`, re-entered via `pending_variant`
//! (user picked a proposed alternative) or `pending_feedback` (user typed a
//! correction), with `failed` terminal on agent failure or timeout. Each
//! running leg is one long agent invocation; the structured tail of its
//! output updates the task's assumptions and variants for the next review
//! round.

use std::sync::Arc;

use chrono::Utc;

use crate::agent::{
    AgentInvocation, AgentOutcome, AgentRunner, IdeaLeg, build_idea_prompt, parse_idea_block,
};
use crate::classify::{FailureKind, classify_failure};
use crate::config::AgentConfig;
use crate::error::DroverResult;
use crate::store::{TaskPatch, TaskStore};
use crate::types::{Task, TaskId, TaskStatus, WorkflowStatus};
use crate::utils::{tail_snippet, truncate_chars};

const RESULT_SNIPPET_CHARS: usize = 2_000;

/// Drives one claimed idea task through a single workflow leg.
pub struct IdeaWorkflow {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn AgentRunner>,
    config: AgentConfig,
    error_message_limit: usize,
}

impl IdeaWorkflow {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn AgentRunner>,
        config: AgentConfig,
        error_message_limit: usize,
    ) -> Self {
        Self {
            store,
            runner,
            config,
            error_message_limit,
        }
    }

    /// Run one leg for a freshly claimed idea task. The pre-claim
    /// `workflow_status` decides which leg this is: `pending_variant` and
    /// `pending_feedback` are the re-entry edges, anything else starts the
    /// exploration from scratch.
    pub async fn execute(&self, task: Task, rules_block: &str) -> DroverResult<()> {
        let leg = match task.workflow_status {
            WorkflowStatus::PendingVariant => IdeaLeg::Variant {
                index: task.selected_variant_index.unwrap_or(0),
            },
            WorkflowStatus::PendingFeedback => IdeaLeg::Feedback {
                feedback: task.user_feedback.as_deref().unwrap_or(""),
            },
            _ => IdeaLeg::Initial,
        };
        tracing::info!(task_id = %task.id, leg = ?leg, "starting idea workflow leg");

        self.store
            .update_task(
                &task.id,
                TaskPatch {
                    workflow_status: Some(WorkflowStatus::Running),
                    ..TaskPatch::default()
                },
            )
            .await?;

        let messages = match self.store.list_thread_messages(&task.id).await {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(task_id = %task.id, %error, "thread fetch failed, running without it");
                Vec::new()
            }
        };

        let prompt = build_idea_prompt(&task, &messages, rules_block, leg);
        let invocation = AgentInvocation {
            task_id: task.id.clone(),
            prompt,
            working_dir: task.project_path.clone(),
            timeout: self.config.idea_timeout,
        };

        match self.runner.run(invocation).await {
            Ok(outcome) => self.settle(&task, leg, outcome).await,
            Err(error) => {
                let classification = classify_failure(None, &error.to_string(), false);
                self.fail(&task.id, classification.kind, error.to_string())
                    .await
            }
        }
    }

    async fn settle(&self, task: &Task, leg: IdeaLeg<'_>, outcome: AgentOutcome) -> DroverResult<()> {
        let current = self.store.get_task(&task.id).await?;
        if current.status != TaskStatus::InProgress {
            tracing::info!(
                task_id = %task.id,
                status = %current.status,
                "idea task settled through the agent's own channel, deferring"
            );
            return Ok(());
        }

        if outcome.timed_out {
            let message = format!(
                "idea leg timed out after {} seconds",
                self.config.idea_timeout.as_secs()
            );
            let classification =
                classify_failure(outcome.exit_code, &message, current.cancel_requested);
            return self.fail(&task.id, classification.kind, message).await;
        }
        if !outcome.success() {
            let classification =
                classify_failure(outcome.exit_code, &outcome.stderr, current.cancel_requested);
            return self
                .fail(&task.id, classification.kind, outcome.failure_message())
                .await;
        }

        if current.cancel_requested {
            let mut patch = TaskPatch::cancelled(Utc::now());
            patch.workflow_status = Some(WorkflowStatus::None);
            let settled = self
                .store
                .update_task_if_status(&task.id, TaskStatus::InProgress, patch)
                .await?;
            if settled {
                tracing::info!(task_id = %task.id, "idea cancelled after its leg finished");
            }
            return Ok(());
        }

        let block = parse_idea_block(&outcome.stdout);
        let mut patch = TaskPatch {
            status: Some(TaskStatus::AwaitingFeedback),
            workflow_status: Some(WorkflowStatus::AwaitingFeedback),
            ..TaskPatch::default()
        };
        // An empty block on a re-entry leg means the agent skipped the
        // reporting contract; keep the previously discovered state rather
        // than wiping what the user is choosing from.
        if !block.is_empty() || matches!(leg, IdeaLeg::Initial) {
            patch.assumptions = Some(block.assumptions);
            patch.variants = Some(block.variants);
        }
        if block.selected_variant_index.is_some() {
            patch.selected_variant_index = block.selected_variant_index;
        }
        if block.epic_id.is_some() {
            patch.epic_id = block.epic_id;
        }
        if current.result.is_none() {
            patch.result = tail_snippet(&outcome.stdout, RESULT_SNIPPET_CHARS);
        }

        let settled = self
            .store
            .update_task_if_status(&task.id, TaskStatus::InProgress, patch)
            .await?;
        if settled {
            tracing::info!(task_id = %task.id, "idea leg complete, awaiting feedback");
        } else {
            tracing::info!(task_id = %task.id, "idea task moved while settling, deferring");
        }
        Ok(())
    }

    async fn fail(&self, id: &TaskId, kind: FailureKind, message: String) -> DroverResult<()> {
        let mut patch = TaskPatch::failed(
            kind,
            truncate_chars(&message, self.error_message_limit),
            Utc::now(),
        );
        patch.workflow_status = Some(WorkflowStatus::Failed);
        let settled = self
            .store
            .update_task_if_status(id, TaskStatus::InProgress, patch)
            .await?;
        if settled {
            tracing::warn!(task_id = %id, %kind, "idea workflow leg failed");
        } else {
            tracing::info!(task_id = %id, "idea task moved while failing, deferring");
        }
        Ok(())
    }
}
