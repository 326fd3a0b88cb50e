//! Rule records: distilled, scoped, confidence-weighted directives

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::EpisodeId;

/// Identifier of a rule record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RuleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Confidence in a rule, clamped to [0.1, 0.95].
///
/// A rule is never treated as certain, so the ceiling stays below 1.0; the
/// floor keeps a repeatedly contradicted rule from collapsing to zero and
/// disappearing from every audit query. Construction from any source (model
/// output included) clamps rather than trusting the raw value.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Confidence(f32);

impl Confidence {
    pub const FLOOR: f32 = 0.1;
    pub const CEILING: f32 = 0.95;

    /// Create a confidence value, clamping into [0.1, 0.95].
    pub fn new(value: f32) -> Self {
        Self(value.clamp(Self::FLOOR, Self::CEILING))
    }

    /// Base confidence for a rule backed by `count` supporting episodes:
    /// one anecdote is a coin flip, two is a lean, three or more is a trend.
    pub fn for_support(count: usize) -> Self {
        let base = match count {
            0 | 1 => 0.5,
            2 => 0.7,
            _ => 0.85,
        };
        Self::new(base)
    }

    /// Bump for an explicit approval of the rule itself (a later episode
    /// corroborating an existing rule).
    pub fn corroborated(self) -> Self {
        Self::new(self.0 + 0.1)
    }

    /// Penalty for flagged contradictions against this rule.
    pub fn penalized(self, contradictions: usize) -> Self {
        Self::new(self.0 - 0.2 * contradictions as f32)
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl From<f32> for Confidence {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

impl From<Confidence> for f32 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Applicability boundary of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleScope {
    Global,
    ProjectType,
    ProjectSpecific,
}

impl RuleScope {
    /// Minimum confidence for a rule of this scope to be selectable. A
    /// narrowly scoped rule gets the benefit of the doubt sooner than a
    /// global one.
    pub fn selection_threshold(self) -> f32 {
        match self {
            Self::Global => 0.7,
            Self::ProjectType => 0.5,
            Self::ProjectSpecific => 0.0,
        }
    }

    /// Whether this scope requires a qualifier (a project-type tag or a
    /// literal project path).
    pub fn requires_qualifier(self) -> bool {
        !matches!(self, Self::Global)
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Global => "global",
            Self::ProjectType => "project-type",
            Self::ProjectSpecific => "project-specific",
        };
        f.write_str(label)
    }
}

/// Subject area of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Design,
    Tooling,
    Architecture,
    Workflow,
    Content,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Design => "design",
            Self::Tooling => "tooling",
            Self::Architecture => "architecture",
            Self::Workflow => "workflow",
            Self::Content => "content",
        };
        f.write_str(label)
    }
}

/// A distilled, reusable directive derived from one or more episodes.
///
/// Created by the distillation engine; mutated by later passes (confidence
/// deltas, merged source sets, conflict links); soft-deactivated, never
/// force-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    pub id: RuleId,
    pub content: String,
    pub scope: RuleScope,
    /// Project-type tag or literal path; required unless scope is global.
    pub scope_qualifier: Option<String>,
    pub category: RuleCategory,
    pub confidence: Confidence,
    pub active: bool,
    pub support_count: usize,
    pub source_episode_ids: Vec<EpisodeId>,
    pub conflicts_with: Vec<RuleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Rule {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::generate(),
            content: String::new(),
            scope: RuleScope::Global,
            scope_qualifier: None,
            category: RuleCategory::Workflow,
            confidence: Confidence::new(0.5),
            active: true,
            support_count: 1,
            source_episode_ids: Vec::new(),
            conflicts_with: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rule fields supplied by the distillation engine; the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub content: String,
    pub scope: RuleScope,
    pub scope_qualifier: Option<String>,
    pub category: RuleCategory,
    pub confidence: Confidence,
    pub support_count: usize,
    pub source_episode_ids: Vec<EpisodeId>,
}

impl RuleDraft {
    /// Materialize a full rule record (memory store).
    pub fn into_rule(self, id: RuleId) -> Rule {
        let now = Utc::now();
        Rule {
            id,
            content: self.content,
            scope: self.scope,
            scope_qualifier: self.scope_qualifier,
            category: self.category,
            confidence: self.confidence,
            active: true,
            support_count: self.support_count,
            source_episode_ids: self.source_episode_ids,
            conflicts_with: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
