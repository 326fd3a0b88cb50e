//! Rule distillation engine
//!
//! Compresses batches of undistilled episodes into scoped rules via one
//! synthesis call per batch. The model proposes; the engine disposes:
//! confidence always comes from the support-count envelope, never from the
//! model verbatim, and every episode in a consumed batch is marked distilled
//! exactly once. A batch is consumed when the response yields a verdict at
//! all, even an empty one; transport and parse failures leave the batch
//! intact for the next run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::LearningConfig;
use crate::error::{DroverError, DroverResult};
use crate::llm::SynthesisClient;
use crate::store::{RuleUpdate, TaskStore};
use crate::types::{
    Confidence, Episode, EpisodeId, FeedbackType, Rule, RuleCategory, RuleDraft, RuleId, RuleScope,
};
use crate::utils::extract_object;

const DISTILL_SYSTEM_PROMPT: &str = "You distill user-feedback episodes into reusable \
preference rules. Propose a rule only when the episodes genuinely support one, scoped as \
narrowly as the evidence justifies: prefer project-specific or project-type scope over \
global. Corroborate an existing rule instead of duplicating it, and flag explicit \
contradictions between an episode and an existing rule. Reply with exactly one JSON object:\n\
{\"newRules\": [{\"content\": \"imperative directive\", \"scope\": \"global\"|\"project-type\"|\
\"project-specific\", \"scopeQualifier\": \"project type tag or path, null for global\", \
\"category\": \"design\"|\"tooling\"|\"architecture\"|\"workflow\"|\"content\", \
\"episodeIndexes\": [0]}], \"updates\": [{\"ruleId\": \"existing rule id\", \
\"episodeIndexes\": [1]}], \"conflicts\": [{\"ruleId\": \"existing rule id\", \
\"episodeIndex\": 2}, {\"ruleId\": \"existing rule id\", \"newRuleIndex\": 0}]}\n\
Use empty arrays when nothing qualifies. No text outside the object.";

/// Result of one distillation attempt, in CLI-printable form.
#[derive(Debug, PartialEq, Eq)]
pub enum DistillationOutcome {
    /// Not enough undistilled episodes to run.
    Skipped { available: usize, required: usize },
    Completed {
        episodes: usize,
        new_rules: usize,
        updated_rules: usize,
        conflicts: usize,
    },
}

impl fmt::Display for DistillationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped {
                available,
                required,
            } => write!(
                f,
                "skipped: {available} undistilled episode(s), need at least {required}"
            ),
            Self::Completed {
                episodes,
                new_rules,
                updated_rules,
                conflicts,
            } => write!(
                f,
                "distilled {episodes} episode(s): {new_rules} new rule(s), \
                 {updated_rules} updated, {conflicts} conflict(s) flagged"
            ),
        }
    }
}

/// Batch converter from episodes to rules.
pub struct RuleDistiller {
    store: Arc<dyn TaskStore>,
    synthesis: Arc<dyn SynthesisClient>,
    config: LearningConfig,
}

impl RuleDistiller {
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

    /// Long-period loop. Runs until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.distill_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_once().await {
                Ok(DistillationOutcome::Skipped { .. }) => {}
                Ok(outcome) => tracing::info!("{outcome}"),
                Err(error) => tracing::warn!(%error, "distillation failed, batch kept"),
            }
        }
        tracing::debug!("rule distiller stopped");
    }

    /// One distillation attempt over the full undistilled batch.
    pub async fn run_once(&self) -> DroverResult<DistillationOutcome> {
        let episodes = self.store.list_undistilled_episodes().await?;
        if episodes.len() < self.config.min_batch_size {
            return Ok(DistillationOutcome::Skipped {
                available: episodes.len(),
                required: self.config.min_batch_size,
            });
        }

        let rules = self.store.list_active_rules().await?;
        let prompt = build_distillation_prompt(&episodes, &rules);
        let response = self.synthesis.complete(DISTILL_SYSTEM_PROMPT, &prompt).await?;
        let Some(verdict) = DistillationVerdict::parse(&response) else {
            return Err(DroverError::parse(
                "no distillation verdict in synthesis response",
            ));
        };

        let outcome = self.apply_verdict(&verdict, &episodes, &rules).await?;

        // The batch is consumed regardless of what it produced.
        let batch_ids: Vec<EpisodeId> = episodes.iter().map(|episode| episode.id.clone()).collect();
        self.store.mark_episodes_distilled(&batch_ids).await?;
        Ok(outcome)
    }

    async fn apply_verdict(
        &self,
        verdict: &DistillationVerdict,
        episodes: &[Episode],
        rules: &[Rule],
    ) -> DroverResult<DistillationOutcome> {
        let rules_by_id: HashMap<&RuleId, &Rule> =
            rules.iter().map(|rule| (&rule.id, rule)).collect();
        let episode_by_index = |index: usize| episodes.get(index);

        // New rules first so conflicts can link to their assigned ids.
        // `created` stays aligned with proposal indexes; dropped proposals
        // leave a None.
        let mut created: Vec<Option<RuleId>> = Vec::with_capacity(verdict.new_rules.len());
        for proposal in &verdict.new_rules {
            let Some(draft) = proposal.to_draft(episodes) else {
                tracing::warn!(content = %proposal.content, "dropping malformed rule proposal");
                created.push(None);
                continue;
            };
            let id = self.store.create_rule(draft).await?;
            tracing::info!(rule_id = %id, content = %proposal.content, "distilled new rule");
            created.push(Some(id));
        }
        let new_rules = created.iter().flatten().count();

        // Corroborations raise existing rules to the envelope of their
        // merged support, with the approval bonus when an approving episode
        // is among the corroborators.
        let mut pending: HashMap<RuleId, RuleUpdate> = HashMap::new();
        for corroboration in &verdict.updates {
            let Some(rule) = rules_by_id.get(&corroboration.rule_id) else {
                tracing::warn!(rule_id = %corroboration.rule_id, "update references unknown rule");
                continue;
            };
            let mut sources = rule.source_episode_ids.clone();
            let mut approving = false;
            for &index in &corroboration.episode_indexes {
                let Some(episode) = episode_by_index(index) else {
                    continue;
                };
                if !sources.contains(&episode.id) {
                    sources.push(episode.id.clone());
                }
                approving |= episode.feedback_type == FeedbackType::Approval;
            }
            let envelope = Confidence::for_support(sources.len());
            let mut confidence = if envelope > rule.confidence {
                envelope
            } else {
                rule.confidence
            };
            if approving {
                confidence = confidence.corroborated();
            }
            let update = pending.entry(rule.id.clone()).or_default();
            update.confidence = Some(confidence);
            update.support_count = Some(sources.len());
            update.source_episode_ids = Some(sources);
        }

        // Conflicts: an episode contradicting a rule costs confidence; a new
        // rule contradicting an existing one gets cross-linked both ways.
        let mut conflicts = 0usize;
        let mut penalties: HashMap<RuleId, usize> = HashMap::new();
        for conflict in &verdict.conflicts {
            if !rules_by_id.contains_key(&conflict.rule_id) {
                tracing::warn!(rule_id = %conflict.rule_id, "conflict references unknown rule");
                continue;
            }
            if conflict.episode_index.is_some() {
                *penalties.entry(conflict.rule_id.clone()).or_default() += 1;
                conflicts += 1;
            } else if let Some(new_id) = conflict
                .new_rule_index
                .and_then(|index| created.get(index).cloned().flatten())
            {
                pending
                    .entry(conflict.rule_id.clone())
                    .or_default()
                    .add_conflicts_with
                    .push(new_id.clone());
                self.store
                    .update_rule(
                        &new_id,
                        RuleUpdate {
                            add_conflicts_with: vec![conflict.rule_id.clone()],
                            ..RuleUpdate::default()
                        },
                    )
                    .await?;
                conflicts += 1;
            }
        }
        for (rule_id, count) in penalties {
            // Membership was checked when the penalty was tallied.
            let Some(rule) = rules_by_id.get(&rule_id) else {
                continue;
            };
            let update = pending.entry(rule_id.clone()).or_default();
            let base = update.confidence.unwrap_or(rule.confidence);
            update.confidence = Some(base.penalized(count));
        }

        let updated_rules = pending.len();
        for (rule_id, update) in pending {
            self.store.update_rule(&rule_id, update).await?;
        }

        Ok(DistillationOutcome::Completed {
            episodes: episodes.len(),
            new_rules,
            updated_rules,
            conflicts,
        })
    }
}

fn build_distillation_prompt(episodes: &[Episode], rules: &[Rule]) -> String {
    let mut prompt = String::from("# Episodes\n\n");
    for (index, episode) in episodes.iter().enumerate() {
        prompt.push_str(&format!("{index}. [{}]", episode.feedback_type));
        if let Some(project_type) = &episode.project_type {
            prompt.push_str(&format!(" (project type: {project_type})"));
        }
        if !episode.work_context.is_empty() {
            prompt.push_str(&format!(" (context: {})", episode.work_context));
        }
        prompt.push_str(&format!(" {}\n", episode.narrative));
        if !episode.tags.is_empty() {
            prompt.push_str(&format!("   tags: {}\n", episode.tags.join(", ")));
        }
    }

    prompt.push_str("\n# Active rules\n\n");
    if rules.is_empty() {
        prompt.push_str("(none yet)\n");
    }
    for rule in rules {
        let scope = match &rule.scope_qualifier {
            Some(qualifier) => format!("{}/{qualifier}", rule.scope),
            None => rule.scope.to_string(),
        };
        prompt.push_str(&format!(
            "- id: {} [{scope}, {}] confidence {}: {}\n",
            rule.id, rule.category, rule.confidence, rule.content
        ));
    }
    prompt
}

/// One proposed rule from a distillation verdict. Confidence, if the model
/// offers one, only ever lowers the support-count envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct NewRuleProposal {
    content: String,
    scope: RuleScope,
    scope_qualifier: Option<String>,
    category: RuleCategory,
    confidence: Option<Confidence>,
    episode_indexes: Vec<usize>,
}

impl Default for NewRuleProposal {
    fn default() -> Self {
        Self {
            content: String::new(),
            scope: RuleScope::Global,
            scope_qualifier: None,
            category: RuleCategory::Workflow,
            confidence: None,
            episode_indexes: Vec::new(),
        }
    }
}

impl NewRuleProposal {
    fn to_draft(&self, episodes: &[Episode]) -> Option<RuleDraft> {
        let content = self.content.trim();
        if content.is_empty() {
            return None;
        }
        // A scoped rule without a qualifier can never be selected.
        if self.scope.requires_qualifier() && self.scope_qualifier.is_none() {
            return None;
        }
        let sources: Vec<EpisodeId> = self
            .episode_indexes
            .iter()
            .filter_map(|&index| episodes.get(index))
            .map(|episode| episode.id.clone())
            .collect();
        let envelope = Confidence::for_support(sources.len());
        let confidence = match self.confidence {
            Some(proposed) if proposed < envelope => proposed,
            _ => envelope,
        };
        Some(RuleDraft {
            content: content.to_string(),
            scope: self.scope,
            scope_qualifier: self.scope_qualifier.clone(),
            category: self.category,
            confidence,
            support_count: sources.len(),
            source_episode_ids: sources,
        })
    }
}

// `ruleId` is required; an update or conflict without one is meaningless and
// gets dropped at parse time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleCorroboration {
    rule_id: RuleId,
    #[serde(default)]
    episode_indexes: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleConflict {
    rule_id: RuleId,
    episode_index: Option<usize>,
    new_rule_index: Option<usize>,
}

#[derive(Debug, Default)]
struct DistillationVerdict {
    new_rules: Vec<NewRuleProposal>,
    updates: Vec<RuleCorroboration>,
    conflicts: Vec<RuleConflict>,
}

impl DistillationVerdict {
    /// Best-effort extraction. Any JSON object yields a verdict; individual
    /// malformed entries are dropped rather than failing the batch.
    fn parse(response: &str) -> Option<Self> {
        let value = extract_object(response)?;
        Some(Self {
            new_rules: section(&value, "newRules"),
            updates: section(&value, "updates"),
            conflicts: section(&value, "conflicts"),
        })
    }
}

fn section<T: serde::de::DeserializeOwned>(value: &Value, key: &str) -> Vec<T> {
    let Some(Value::Array(items)) = value.get(key) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                tracing::warn!(%error, section = key, "dropping malformed verdict entry");
                None
            }
        })
        .collect()
}
