//! Execution-strategy classifier
//!
//! Decides whether a task gets the single-agent prompt or the
//! lead-plus-subagent orchestration prompt. Rules are evaluated in a fixed
//! order so the same inputs always produce the same answer.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::TaskType;

/// How much coordination a task is expected to need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
        };
        f.write_str(label)
    }
}

/// Subtypes that force the orchestrated strategy regardless of text.
const COMPLEX_SUBTYPES: &[&str] = &["epic", "multi-phase", "multi_phase"];

/// Subtypes that stay single-agent even when the text rambles.
const SIMPLE_SUBTYPES: &[&str] = &["ui", "copy", "tweak"];

const ORCHESTRATION_VOCABULARY: &[&str] = &[
    "orchestrate",
    "coordinate",
    "pipeline",
    "end-to-end",
    "end to end",
    "integrat",
    "migrat",
    "across the stack",
    "full stack",
    "infrastructure",
];

const CONJUNCTIVE_MARKERS: &[&str] = &[
    "and then",
    "as well as",
    "followed by",
    "along with",
    "in addition to",
    "plus a",
];

/// Description length that forces the orchestrated strategy on its own.
const DESCRIPTION_COMPLEX_LENGTH: usize = 500;
/// Description length that counts as one moderate signal.
const DESCRIPTION_MODERATE_LENGTH: usize = 200;
/// How many moderate signals together force the orchestrated strategy.
const MODERATE_SIGNAL_THRESHOLD: usize = 2;

static MULTI_PHASE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bphase\s*\d",
        r"(?i)\b(research|investigate|explore|design|prototype)\b.{0,60}\bthen\b.{0,60}\b(build|implement|create|ship|write)\b",
        r"(?i)\bstep\s*1\b.*\bstep\s*2\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static multi-phase pattern"))
    .collect()
});

static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+\S").expect("static numbered-line pattern"));

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

/// Classify a task into an execution strategy.
///
/// Fixed evaluation order: always-complex types, always-simple types,
/// multi-phase language, description length over the upper bound, then an
/// accumulation of moderate signals. The first rule that fires decides.
pub fn classify_complexity(
    task_type: TaskType,
    subtype: Option<&str>,
    title: &str,
    description: &str,
) -> Complexity {
    let subtype = subtype.map(str::to_lowercase);
    let subtype = subtype.as_deref();

    // Explicit multi-phase project work is always orchestrated.
    if matches!(task_type, TaskType::Project)
        || subtype.is_some_and(|s| COMPLEX_SUBTYPES.contains(&s))
    {
        return Complexity::Complex;
    }

    // Pure research/writing and small user-visible tweaks are always
    // single-agent, even when the description is long-winded.
    if matches!(task_type, TaskType::Research | TaskType::Writing)
        || subtype.is_some_and(|s| SIMPLE_SUBTYPES.contains(&s))
    {
        return Complexity::Simple;
    }

    let text = format!("{title}\n{description}").to_lowercase();

    if MULTI_PHASE_PATTERNS.iter().any(|re| re.is_match(&text))
        || NUMBERED_LINE.find_iter(description).count() >= 3
    {
        return Complexity::Complex;
    }

    let description_len = description.chars().count();
    if description_len > DESCRIPTION_COMPLEX_LENGTH {
        return Complexity::Complex;
    }

    let mut moderate_signals = 0;
    if contains_any(&text, ORCHESTRATION_VOCABULARY) {
        moderate_signals += 1;
    }
    if contains_any(&text, CONJUNCTIVE_MARKERS) {
        moderate_signals += 1;
    }
    if description_len > DESCRIPTION_MODERATE_LENGTH {
        moderate_signals += 1;
    }

    if moderate_signals >= MODERATE_SIGNAL_THRESHOLD {
        Complexity::Complex
    } else {
        Complexity::Simple
    }
}
