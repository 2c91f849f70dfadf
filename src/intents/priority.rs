use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{clean, extract, nullable_string, object_schema, string_enum, titled};
use crate::error::Result;
use crate::interfaces::providers::LlmProvider;
use crate::tasks::Priority;

const PRIORITY_SYSTEM_PROMPT: &str = "The user wants to change how important one of their \
tasks is. Return the task title as they referred to it and the new priority: `vital` for \
urgent or important, `trivial` for low priority, `medium` for normal. Use `none` if no \
priority is stated.";

static VITAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:urgent|important|high|vital|critical)\b").unwrap());
static TRIVIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:low|trivial|unimportant|whenever)\b").unwrap());

#[derive(Debug, Clone, Deserialize)]
struct RawPriority {
    title: Option<String>,
    priority: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityIntent {
    pub title: Option<String>,
    pub priority: Priority,
}

pub fn priority_schema() -> Value {
    titled(
        "priority_intent",
        object_schema(vec![
            ("title", nullable_string()),
            ("priority", string_enum(&["vital", "medium", "trivial", "none"])),
        ]),
    )
}

/// Keyword classes checked in order. "medium", "normal" and anything unrecognised map
/// to medium.
pub fn priority_from_keywords(text: &str) -> Priority {
    if VITAL_RE.is_match(text) {
        Priority::Vital
    } else if TRIVIAL_RE.is_match(text) {
        Priority::Trivial
    } else {
        Priority::Medium
    }
}

pub async fn extract_priority(llm: &dyn LlmProvider, text: &str) -> Result<PriorityIntent> {
    let raw: Option<RawPriority> =
        extract(llm, PRIORITY_SYSTEM_PROMPT, text.trim(), priority_schema()).await?;
    let (title, priority) = match raw {
        Some(raw) => (clean(raw.title), Priority::parse(&raw.priority)),
        None => (None, None),
    };
    Ok(PriorityIntent {
        title,
        priority: priority.unwrap_or_else(|| priority_from_keywords(text)),
    })
}
