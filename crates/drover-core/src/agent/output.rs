//! Recovery of the structured trailing block from idea-leg output
//!
//! The reporting contract asks the agent to end with one fenced JSON block.
//! Agents drift from contracts, so parsing is best-effort and shape-tolerant:
//! anything unrecoverable degrades to an empty block rather than an error.

use serde_json::Value;

use crate::types::{Assumption, IdeaVariant};
use crate::utils::last_object_with_keys;

const BLOCK_KEYS: &[&str] = &["assumptions", "variants", "selectedVariantIndex", "epicId"];

/// Structured state recovered from the tail of an idea-leg run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdeaBlock {
    pub assumptions: Vec<Assumption>,
    pub variants: Vec<IdeaVariant>,
    pub selected_variant_index: Option<usize>,
    pub epic_id: Option<String>,
}

impl IdeaBlock {
    /// True when the agent reported nothing usable; callers keep prior state
    /// instead of overwriting it with emptiness.
    pub fn is_empty(&self) -> bool {
        self.assumptions.is_empty()
            && self.variants.is_empty()
            && self.selected_variant_index.is_none()
            && self.epic_id.is_none()
    }
}

/// Extract the trailing idea block from raw agent stdout. Never fails: output
/// without a recognizable block yields `IdeaBlock::default()`.
pub fn parse_idea_block(stdout: &str) -> IdeaBlock {
    let Some(value) = last_object_with_keys(stdout, BLOCK_KEYS) else {
        return IdeaBlock::default();
    };

    IdeaBlock {
        assumptions: assumptions_from_value(value.get("assumptions")),
        variants: variants_from_value(value.get("variants")),
        selected_variant_index: index_from_value(value.get("selectedVariantIndex")),
        epic_id: value
            .get("epicId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string),
    }
}

/// Accepts both shapes agents actually emit: an array of `{key, value}`
/// objects and a flat `{"key": "value"}` map.
fn assumptions_from_value(value: Option<&Value>) -> Vec<Assumption> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let key = item.get("key")?.as_str()?.to_string();
                let value = stringify(item.get("value")?);
                Some(Assumption { key, value })
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| Assumption {
                key: key.clone(),
                value: stringify(value),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn variants_from_value(value: Option<&Value>) -> Vec<IdeaVariant> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items.iter().filter_map(variant_from_value).collect()
}

fn variant_from_value(value: &Value) -> Option<IdeaVariant> {
    // A variant without a name is unusable in the review UI; drop it.
    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(IdeaVariant {
        name: name.to_string(),
        description: value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        pros: string_list(value.get("pros")),
        cons: string_list(value.get("cons")),
    })
}

fn index_from_value(value: Option<&Value>) -> Option<usize> {
    match value {
        Some(Value::Number(number)) => number.as_u64().map(|n| n as usize),
        // Some models quote numbers.
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(stringify).collect(),
        _ => Vec::new(),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
