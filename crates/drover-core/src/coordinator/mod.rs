//! Task queue coordinator
//!
//! Polls the store for pending tasks, claims them optimistically, and runs
//! them strictly one at a time through the external agent. The conditional
//! update is the only mutual-exclusion mechanism available, so a claim is
//! verified by re-reading the record and checking our own executor stamp;
//! on last-write-wins stores the write alone cannot prove ownership.
//!
//! Stale-claim recovery is a liveness pass, not a correctness one: a task
//! reset to pending because its executor looked dead may be double-executed
//! if the executor was merely slow.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentInvocation, AgentOutcome, AgentRunner, PromptContext, build_task_prompt};
use crate::classify::{FailureKind, classify_complexity, classify_failure};
use crate::config::{AgentConfig, CoordinatorConfig};
use crate::error::DroverResult;
use crate::learning::{RuleSelection, RuleSelector, render_rules};
use crate::store::{TaskFilter, TaskPatch, TaskStore};
use crate::types::{Task, TaskId, TaskStatus};
use crate::utils::{tail_snippet, truncate_chars};
use crate::workflow::IdeaWorkflow;

const RESULT_SNIPPET_CHARS: usize = 2_000;

pub struct Coordinator {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn AgentRunner>,
    selector: Arc<RuleSelector>,
    workflow: IdeaWorkflow,
    config: CoordinatorConfig,
    agent_config: AgentConfig,
    /// Executor stamp written into every claim; claim verification compares
    /// against it.
    instance: String,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn AgentRunner>,
        selector: Arc<RuleSelector>,
        config: CoordinatorConfig,
        agent_config: AgentConfig,
    ) -> Self {
        let workflow = IdeaWorkflow::new(
            store.clone(),
            runner.clone(),
            agent_config.clone(),
            config.error_message_limit,
        );
        Self {
            store,
            runner,
            selector,
            workflow,
            config,
            agent_config,
            instance: format!("drover-{}", Uuid::new_v4()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    /// Poll loop. Runs until `shutdown` fires; the task being executed when
    /// shutdown arrives finishes its store writes first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(instance = %self.instance, "coordinator starting");
        match recover_stale_tasks(self.store.as_ref(), self.config.stale_after).await {
            Ok(0) => {}
            Ok(recovered) => tracing::info!(recovered, "reset stale claims at startup"),
            Err(error) => tracing::warn!(%error, "startup stale scan failed"),
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_stale_scan = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(error) = self.run_cycle(&shutdown).await {
                tracing::warn!(%error, "poll cycle failed");
            }
            if last_stale_scan.elapsed() >= self.config.stale_scan_interval {
                last_stale_scan = Instant::now();
                match recover_stale_tasks(self.store.as_ref(), self.config.stale_after).await {
                    Ok(0) => {}
                    Ok(recovered) => tracing::info!(recovered, "reset stale claims"),
                    Err(error) => tracing::warn!(%error, "stale scan failed"),
                }
            }
        }
        tracing::info!("coordinator stopped");
    }

    /// One pass over the pending queue. Tasks run sequentially; a failure on
    /// one task is recorded against that task and does not stop the pass.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> DroverResult<()> {
        let pending = self.store.list_tasks(&TaskFilter::pending()).await?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = pending.len(), "pending tasks this cycle");

        for task in pending {
            if shutdown.is_cancelled() {
                break;
            }
            if task.cancel_requested {
                let cancelled = self
                    .store
                    .update_task_if_status(
                        &task.id,
                        TaskStatus::Pending,
                        TaskPatch::cancelled(Utc::now()),
                    )
                    .await?;
                if cancelled {
                    tracing::info!(task_id = %task.id, "cancelled before execution");
                }
                continue;
            }
            let Some(claimed) = self.try_claim(&task).await? else {
                continue;
            };
            if let Err(error) = self.execute(claimed).await {
                tracing::error!(task_id = %task.id, %error, "task execution errored");
            }
        }
        Ok(())
    }

    /// Optimistic claim: conditional update from `pending`, then re-read and
    /// verify our executor stamp survived. Returns the claimed snapshot, or
    /// `None` when another instance won.
    async fn try_claim(&self, task: &Task) -> DroverResult<Option<Task>> {
        let claimed = self
            .store
            .update_task_if_status(
                &task.id,
                TaskStatus::Pending,
                TaskPatch::claim(&self.instance, Utc::now()),
            )
            .await?;
        if !claimed {
            tracing::debug!(task_id = %task.id, "lost the claim race");
            return Ok(None);
        }
        let current = self.store.get_task(&task.id).await?;
        if current.status != TaskStatus::InProgress
            || current.executor.as_deref() != Some(self.instance.as_str())
        {
            tracing::debug!(task_id = %task.id, "claim overwritten by another instance");
            return Ok(None);
        }
        tracing::info!(task_id = %task.id, title = %current.title, "claimed task");
        Ok(Some(current))
    }

    async fn execute(&self, task: Task) -> DroverResult<()> {
        // Rules are an enrichment; a broken selector degrades to running
        // without them rather than blocking the queue.
        let selection = match self.selector.select_for_task(&task).await {
            Ok(selection) => selection,
            Err(error) => {
                tracing::warn!(task_id = %task.id, %error, "rule selection failed, running without rules");
                RuleSelection::default()
            }
        };
        let rules_block = render_rules(&selection);

        if task.is_idea() {
            self.workflow.execute(task, &rules_block).await
        } else {
            self.execute_standard(task, &rules_block).await
        }
    }

    async fn execute_standard(&self, task: Task, rules_block: &str) -> DroverResult<()> {
        let messages = match self.store.list_thread_messages(&task.id).await {
            Ok(messages) => messages,
            Err(error) => {
                tracing::warn!(task_id = %task.id, %error, "thread fetch failed, running without it");
                Vec::new()
            }
        };
        let complexity = classify_complexity(
            task.task_type,
            task.subtype.as_deref(),
            &task.title,
            &task.description,
        );
        tracing::info!(task_id = %task.id, %complexity, "executing task");

        let prompt = build_task_prompt(&PromptContext {
            task: &task,
            messages: &messages,
            rules_block,
            complexity,
        });
        let invocation = AgentInvocation {
            task_id: task.id.clone(),
            prompt,
            working_dir: task.project_path.clone(),
            timeout: self.agent_config.task_timeout,
        };

        match self.runner.run(invocation).await {
            Ok(outcome) => self.settle_standard(&task, outcome).await,
            Err(error) => {
                let classification = classify_failure(None, &error.to_string(), false);
                self.fail_task(&task.id, classification.kind, error.to_string())
                    .await
            }
        }
    }

    /// Resolve a finished agent run against the live record. The re-read
    /// serves two purposes: noticing that the agent settled the task through
    /// its own channel (in which case we defer), and picking up a
    /// cancellation that arrived mid-run.
    async fn settle_standard(&self, task: &Task, outcome: AgentOutcome) -> DroverResult<()> {
        let current = self.store.get_task(&task.id).await?;
        if current.status != TaskStatus::InProgress {
            tracing::info!(
                task_id = %task.id,
                status = %current.status,
                "agent settled the task itself, deferring"
            );
            return Ok(());
        }

        if outcome.timed_out {
            let message = format!(
                "execution timed out after {} seconds",
                self.agent_config.task_timeout.as_secs()
            );
            let classification =
                classify_failure(outcome.exit_code, &message, current.cancel_requested);
            return self.fail_task(&task.id, classification.kind, message).await;
        }
        if !outcome.success() {
            let classification =
                classify_failure(outcome.exit_code, &outcome.stderr, current.cancel_requested);
            return self
                .fail_task(&task.id, classification.kind, outcome.failure_message())
                .await;
        }

        if current.cancel_requested {
            let cancelled = self
                .store
                .update_task_if_status(&task.id, TaskStatus::InProgress, TaskPatch::cancelled(Utc::now()))
                .await?;
            if cancelled {
                tracing::info!(task_id = %task.id, "cancelled after its run finished");
            }
            return Ok(());
        }

        // Keep whatever result the agent wrote; fall back to the tail of its
        // output so a completed task never shows an empty result.
        let result = if current.result.is_some() {
            None
        } else {
            tail_snippet(&outcome.stdout, RESULT_SNIPPET_CHARS)
        };
        let completed = self
            .store
            .update_task_if_status(
                &task.id,
                TaskStatus::InProgress,
                TaskPatch::completed(result, Utc::now()),
            )
            .await?;
        if completed {
            tracing::info!(
                task_id = %task.id,
                duration_secs = outcome.duration.as_secs(),
                "task completed"
            );
        } else {
            tracing::info!(task_id = %task.id, "task moved while completing, deferring");
        }
        Ok(())
    }

    async fn fail_task(&self, id: &TaskId, kind: FailureKind, message: String) -> DroverResult<()> {
        let message = truncate_chars(&message, self.config.error_message_limit);
        let failed = self
            .store
            .update_task_if_status(
                id,
                TaskStatus::InProgress,
                TaskPatch::failed(kind, message, Utc::now()),
            )
            .await?;
        if failed {
            tracing::warn!(task_id = %id, %kind, "task failed");
        } else {
            tracing::info!(task_id = %id, "task moved while failing, deferring");
        }
        Ok(())
    }
}

/// Reset in-progress tasks whose claim is older than `stale_after` back to
/// pending. Used by the periodic scan and the `recover` subcommand. Returns
/// how many tasks were reset.
pub async fn recover_stale_tasks(
    store: &dyn TaskStore,
    stale_after: std::time::Duration,
) -> DroverResult<usize> {
    let stale_after =
        chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::hours(1));
    let cutoff = Utc::now() - stale_after;
    let stale = store
        .list_tasks(&TaskFilter::stale_in_progress(cutoff))
        .await?;

    let mut recovered = 0;
    for task in stale {
        let reset = store
            .update_task_if_status(&task.id, TaskStatus::InProgress, TaskPatch::release())
            .await?;
        if reset {
            tracing::warn!(
                task_id = %task.id,
                executor = task.executor.as_deref().unwrap_or("unknown"),
                "reset stale claim to pending"
            );
            recovered += 1;
        }
    }
    Ok(recovered)
}
