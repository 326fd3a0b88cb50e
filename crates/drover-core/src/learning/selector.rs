//! Rule selection and rendering
//!
//! Given a task, pick the learned rules worth injecting into its prompt:
//! infer a project type (directory signals first, free-text heuristics only
//! when no path exists), filter active rules by scope-appropriate confidence
//! thresholds, rank by confidence, and cap the count to bound prompt size.
//! Conflict detection is a registry lookup over `conflicts_with` links, not
//! a general contradiction detector.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::LearningConfig;
use crate::error::DroverResult;
use crate::learning::project::{ProjectTypeCache, infer_project_type_from_text};
use crate::store::TaskStore;
use crate::types::{Rule, RuleId, RuleScope, Task};

const STRONG_CONFIDENCE: f32 = 0.85;
const MODERATE_CONFIDENCE: f32 = 0.7;

/// Ranked rules applicable to one task, plus any cross-linked conflicts that
/// survived truncation.
#[derive(Debug, Default)]
pub struct RuleSelection {
    pub rules: Vec<Rule>,
    pub conflicts: Vec<(RuleId, RuleId)>,
    /// The project type the selection was matched against, if one was
    /// inferred. Kept for logging.
    pub project_type: Option<String>,
}

impl RuleSelection {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub struct RuleSelector {
    store: Arc<dyn TaskStore>,
    cache: ProjectTypeCache,
    max_rules: usize,
}

impl RuleSelector {
    pub fn new(store: Arc<dyn TaskStore>, config: &LearningConfig) -> Self {
        Self {
            store,
            cache: ProjectTypeCache::new(),
            max_rules: config.max_selected_rules,
        }
    }

    /// Select the rules to inject for `task`, ranked by descending
    /// confidence and truncated to the configured maximum.
    pub async fn select_for_task(&self, task: &Task) -> DroverResult<RuleSelection> {
        let project_type = match &task.project_path {
            Some(path) => self.cache.get_or_infer(path),
            None => infer_project_type_from_text(&task.title, &task.description),
        };

        let mut rules: Vec<Rule> = self
            .store
            .list_active_rules()
            .await?
            .into_iter()
            .filter(|rule| {
                rule_applies(rule, project_type.as_deref(), task.project_path.as_deref())
            })
            .collect();

        rules.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.support_count.cmp(&a.support_count))
        });
        rules.truncate(self.max_rules);

        let conflicts = conflict_pairs(&rules);
        if !conflicts.is_empty() {
            tracing::debug!(
                task_id = %task.id,
                conflicts = conflicts.len(),
                "selected rules carry cross-linked conflicts"
            );
        }

        Ok(RuleSelection {
            rules,
            conflicts,
            project_type,
        })
    }
}

fn rule_applies(rule: &Rule, project_type: Option<&str>, project_path: Option<&Path>) -> bool {
    if rule.confidence.value() < rule.scope.selection_threshold() {
        return false;
    }
    match rule.scope {
        RuleScope::Global => true,
        RuleScope::ProjectType => match (&rule.scope_qualifier, project_type) {
            (Some(qualifier), Some(inferred)) => qualifier == inferred,
            _ => false,
        },
        RuleScope::ProjectSpecific => match (&rule.scope_qualifier, project_path) {
            (Some(qualifier), Some(path)) => Path::new(qualifier) == path,
            _ => false,
        },
    }
}

/// Pairs of selected rules that explicitly contradict each other. Only links
/// where both ends survived truncation count.
fn conflict_pairs(rules: &[Rule]) -> Vec<(RuleId, RuleId)> {
    let present: HashSet<&RuleId> = rules.iter().map(|rule| &rule.id).collect();
    let mut pairs = Vec::new();
    for rule in rules {
        for other in &rule.conflicts_with {
            // Emit each pair once regardless of which side carries the link.
            if present.contains(other) && rule.id.as_str() < other.as_str() {
                pairs.push((rule.id.clone(), other.clone()));
            }
        }
    }
    pairs.dedup();
    pairs
}

/// Render a selection into the prompt section handed to the agent. Empty
/// selections render as an empty string so callers can skip the section.
pub fn render_rules(selection: &RuleSelection) -> String {
    if selection.rules.is_empty() {
        return String::new();
    }

    let mut block = String::from("## Learned preferences\n\n");
    block.push_str(
        "Apply these learned preferences from past feedback, strongest first:\n\n",
    );
    for rule in &selection.rules {
        let tier = if rule.confidence.value() >= STRONG_CONFIDENCE {
            "STRONG"
        } else if rule.confidence.value() >= MODERATE_CONFIDENCE {
            "MODERATE"
        } else {
            "TENTATIVE"
        };
        let scope = match (&rule.scope, &rule.scope_qualifier) {
            (RuleScope::Global, _) => "global".to_string(),
            (scope, Some(qualifier)) => format!("{scope}: {qualifier}"),
            (scope, None) => scope.to_string(),
        };
        block.push_str(&format!(
            "- [{tier}] {} ({}, {scope})\n",
            rule.content, rule.category
        ));
    }

    if !selection.conflicts.is_empty() {
        block.push_str("\nSome of these preferences contradict each other:\n");
        for (left, right) in &selection.conflicts {
            let content = |id: &RuleId| {
                selection
                    .rules
                    .iter()
                    .find(|rule| &rule.id == id)
                    .map(|rule| rule.content.as_str())
                    .unwrap_or("?")
            };
            block.push_str(&format!("- \"{}\" vs \"{}\"\n", content(left), content(right)));
        }
        block.push_str(
            "Do not silently pick a side; tell the user which preferences \
             conflict and ask which one applies here.\n",
        );
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{Confidence, RuleCategory, TaskType};

    fn rule(id: &str, scope: RuleScope, qualifier: Option<&str>, confidence: f32) -> Rule {
        Rule {
            id: RuleId::from(id),
            content: format!("rule {id}"),
            scope,
            scope_qualifier: qualifier.map(str::to_string),
            category: RuleCategory::Design,
            confidence: Confidence::new(confidence),
            ..Rule::default()
        }
    }

    fn selector(store: Arc<MemoryStore>) -> RuleSelector {
        RuleSelector::new(store, &LearningConfig::default())
    }

    #[tokio::test]
    async fn test_global_rules_need_high_confidence() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(rule("r-strong", RuleScope::Global, None, 0.9));
        store.insert_rule(rule("r-weak", RuleScope::Global, None, 0.6));

        let task = Task::new("Tidy", "", TaskType::Chore);
        let selection = selector(store).select_for_task(&task).await.unwrap();
        assert_eq!(selection.rules.len(), 1);
        assert_eq!(selection.rules[0].id.as_str(), "r-strong");
    }

    #[tokio::test]
    async fn test_project_type_rules_need_a_matching_qualifier() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(rule(
            "r-match",
            RuleScope::ProjectType,
            Some("landing-page"),
            0.6,
        ));
        store.insert_rule(rule(
            "r-other",
            RuleScope::ProjectType,
            Some("rust-crate"),
            0.9,
        ));

        let task = Task::new("New landing page", "hero and pricing", TaskType::Feature);
        let selection = selector(store).select_for_task(&task).await.unwrap();
        assert_eq!(selection.project_type.as_deref(), Some("landing-page"));
        assert_eq!(selection.rules.len(), 1);
        assert_eq!(selection.rules[0].id.as_str(), "r-match");
    }

    #[tokio::test]
    async fn test_directory_signals_override_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(rule(
            "r-rust",
            RuleScope::ProjectType,
            Some("rust-crate"),
            0.8,
        ));
        store.insert_rule(rule(
            "r-landing",
            RuleScope::ProjectType,
            Some("landing-page"),
            0.8,
        ));

        // Title says landing page; the directory says rust crate. Path wins.
        let task = Task::new("Landing page polish", "", TaskType::Feature)
            .with_project_path(dir.path());
        let selection = selector(store).select_for_task(&task).await.unwrap();
        assert_eq!(selection.project_type.as_deref(), Some("rust-crate"));
        assert_eq!(selection.rules.len(), 1);
        assert_eq!(selection.rules[0].id.as_str(), "r-rust");
    }

    #[tokio::test]
    async fn test_project_specific_rules_match_the_exact_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(rule(
            "r-here",
            RuleScope::ProjectSpecific,
            Some(dir.path().to_str().unwrap()),
            0.3,
        ));
        store.insert_rule(rule(
            "r-elsewhere",
            RuleScope::ProjectSpecific,
            Some("/some/other/project"),
            0.9,
        ));

        let task = Task::new("Fix", "", TaskType::Bug).with_project_path(dir.path());
        let selection = selector(store).select_for_task(&task).await.unwrap();
        assert_eq!(selection.rules.len(), 1);
        assert_eq!(selection.rules[0].id.as_str(), "r-here");
    }

    #[tokio::test]
    async fn test_selection_is_ranked_and_capped() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..20 {
            store.insert_rule(rule(
                &format!("r-{i:02}"),
                RuleScope::Global,
                None,
                0.7 + (i as f32) * 0.01,
            ));
        }

        let task = Task::new("Anything", "", TaskType::Chore);
        let selection = selector(store).select_for_task(&task).await.unwrap();
        assert_eq!(selection.rules.len(), 15);
        assert_eq!(selection.rules[0].id.as_str(), "r-19");
        let confidences: Vec<f32> = selection
            .rules
            .iter()
            .map(|rule| rule.confidence.value())
            .collect();
        let mut sorted = confidences.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(confidences, sorted);
    }

    #[tokio::test]
    async fn test_conflicts_require_both_ends_selected() {
        let store = Arc::new(MemoryStore::new());
        let mut left = rule("r-left", RuleScope::Global, None, 0.9);
        left.conflicts_with = vec![RuleId::from("r-right"), RuleId::from("r-absent")];
        store.insert_rule(left);
        store.insert_rule(rule("r-right", RuleScope::Global, None, 0.8));
        // r-absent is below the global threshold, so it never enters.
        store.insert_rule(rule("r-absent", RuleScope::Global, None, 0.4));

        let task = Task::new("Anything", "", TaskType::Chore);
        let selection = selector(store).select_for_task(&task).await.unwrap();
        assert_eq!(selection.conflicts.len(), 1);
        assert_eq!(selection.conflicts[0].0.as_str(), "r-left");
        assert_eq!(selection.conflicts[0].1.as_str(), "r-right");
    }

    #[tokio::test]
    async fn test_render_groups_by_strength_tier() {
        let store = Arc::new(MemoryStore::new());
        store.insert_rule(rule("r-strong", RuleScope::Global, None, 0.9));
        store.insert_rule(rule("r-moderate", RuleScope::Global, None, 0.75));
        store.insert_rule(rule(
            "r-tentative",
            RuleScope::ProjectType,
            Some("landing-page"),
            0.55,
        ));

        let task = Task::new("Landing page refresh", "", TaskType::Feature);
        let selection = selector(store).select_for_task(&task).await.unwrap();
        let block = render_rules(&selection);
        assert!(block.starts_with("## Learned preferences"));
        assert!(block.contains("[STRONG] rule r-strong"));
        assert!(block.contains("[MODERATE] rule r-moderate"));
        assert!(block.contains("[TENTATIVE] rule r-tentative"));
        assert!(block.contains("project-type: landing-page"));
    }

    #[tokio::test]
    async fn test_render_of_empty_selection_is_empty() {
        assert_eq!(render_rules(&RuleSelection::default()), "");
    }

    #[tokio::test]
    async fn test_conflict_footer_instructs_surfacing() {
        let store = Arc::new(MemoryStore::new());
        let mut left = rule("r-a", RuleScope::Global, None, 0.9);
        left.conflicts_with = vec![RuleId::from("r-b")];
        store.insert_rule(left);
        store.insert_rule(rule("r-b", RuleScope::Global, None, 0.85));

        let task = Task::new("Anything", "", TaskType::Chore);
        let selection = selector(store).select_for_task(&task).await.unwrap();
        let block = render_rules(&selection);
        assert!(block.contains("contradict each other"));
        assert!(block.contains("\"rule r-a\" vs \"rule r-b\""));
        assert!(block.contains("ask which one applies"));
    }
}
