use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{clean, extract, nullable_string, object_schema, string_enum, titled};
use crate::error::Result;
use crate::interfaces::providers::LlmProvider;
use crate::matcher::{self, Candidate, ItemKind, Scored};

const RESOLVE_SYSTEM_PROMPT: &str = "The user is telling you that something on their list is \
finished or should be removed. Choose `complete` or `delete` and the kind of item it refers \
to, using the id from the listed items when one clearly matches. Use `none` when the message \
is not about finishing or removing an existing item.";

static COMPLETION_VERB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:done|did|finished|completed|called|took|taken)\b").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Complete,
    Delete,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RawTarget {
    Task,
    Reminder,
    Event,
    None,
}

#[derive(Debug, Clone, Deserialize)]
struct RawResolve {
    action: ResolveAction,
    target: RawTarget,
    target_id: Option<i64>,
    title: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveIntent {
    Act {
        action: ResolveAction,
        target: ItemKind,
        target_id: Option<i32>,
        title: Option<String>,
    },
    Abstain,
}

/// Live items the resolver may refer to, one pool per kind.
#[derive(Debug, Clone, Default)]
pub struct ResolvePools {
    pub tasks: Vec<Candidate>,
    pub reminders: Vec<Candidate>,
    pub events: Vec<Candidate>,
}

impl ResolvePools {
    pub fn pool(&self, kind: ItemKind) -> &[Candidate] {
        match kind {
            ItemKind::Task => &self.tasks,
            ItemKind::Reminder => &self.reminders,
            ItemKind::Event => &self.events,
        }
    }

    fn describe(&self) -> String {
        let mut out = String::new();
        for kind in [ItemKind::Task, ItemKind::Reminder, ItemKind::Event] {
            out.push_str(&format!("{}s:\n", kind.as_str()));
            let pool = self.pool(kind);
            if pool.is_empty() {
                out.push_str("  (none)\n");
            }
            for candidate in pool {
                out.push_str(&format!("  [{}] {}\n", candidate.id, candidate.label));
            }
        }
        out
    }
}

pub fn resolve_schema() -> Value {
    titled(
        "resolve_intent",
        object_schema(vec![
            ("action", string_enum(&["complete", "delete", "none"])),
            ("target", string_enum(&["task", "reminder", "event", "none"])),
            ("target_id", json!({"type": ["integer", "null"]})),
            ("title", nullable_string()),
        ]),
    )
}

pub fn has_completion_verb(text: &str) -> bool {
    COMPLETION_VERB_RE.is_match(text)
}

pub async fn extract_resolve(
    llm: &dyn LlmProvider,
    text: &str,
    pools: &ResolvePools,
) -> Result<ResolveIntent> {
    let prompt = format!("Open items:\n{}\nMessage: {}", pools.describe(), text.trim());
    let raw: Option<RawResolve> =
        extract(llm, RESOLVE_SYSTEM_PROMPT, &prompt, resolve_schema()).await?;
    let Some(raw) = raw else {
        return Ok(ResolveIntent::Abstain);
    };
    let target = match raw.target {
        RawTarget::Task => ItemKind::Task,
        RawTarget::Reminder => ItemKind::Reminder,
        RawTarget::Event => ItemKind::Event,
        RawTarget::None => return Ok(ResolveIntent::Abstain),
    };
    if raw.action == ResolveAction::None {
        return Ok(ResolveIntent::Abstain);
    }
    Ok(ResolveIntent::Act {
        action: raw.action,
        target,
        target_id: raw.target_id.and_then(|id| i32::try_from(id).ok()),
        title: clean(raw.title),
    })
}

/// Picks the concrete item an extracted intent refers to: a listed id wins, then the
/// title hint (or the whole message) matched inside the named pool.
pub fn pick_target(
    text: &str,
    target: ItemKind,
    target_id: Option<i32>,
    title: Option<&str>,
    pools: &ResolvePools,
) -> Option<Scored> {
    let pool = pools.pool(target);
    if let Some(id) = target_id {
        if let Some(candidate) = pool.iter().find(|c| c.id == id) {
            return Some(Scored {
                candidate: candidate.clone(),
                score: 1.0,
            });
        }
    }
    title
        .and_then(|hint| matcher::best_match(hint, pool))
        .or_else(|| matcher::best_match(text, pool))
}

/// Local fallback when the model abstains: completion verbs plus the best match across
/// all pools.
pub fn fallback_completion(text: &str, pools: &ResolvePools) -> Option<Scored> {
    if !has_completion_verb(text) {
        return None;
    }
    matcher::best_across(
        text,
        &[
            pools.tasks.as_slice(),
            pools.reminders.as_slice(),
            pools.events.as_slice(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> ResolvePools {
        ResolvePools {
            tasks: vec![Candidate::new(ItemKind::Task, 1, "Call the plumber")],
            reminders: vec![
                Candidate::new(ItemKind::Reminder, 10, "Morning meds"),
                Candidate::new(ItemKind::Reminder, 11, "Evening meds"),
            ],
            events: vec![Candidate::new(ItemKind::Event, 20, "Dentist")],
        }
    }

    #[test]
    fn fallback_needs_a_completion_verb() {
        assert!(fallback_completion("morning meds", &pools()).is_none());
        let hit = fallback_completion("I took my morning meds", &pools()).unwrap();
        assert_eq!(hit.candidate.id, 10);
    }

    #[test]
    fn listed_id_beats_title_matching() {
        let hit = pick_target("done", ItemKind::Reminder, Some(11), Some("morning"), &pools()).unwrap();
        assert_eq!(hit.candidate.id, 11);
        let hit = pick_target("done", ItemKind::Reminder, Some(99), Some("morning meds"), &pools()).unwrap();
        assert_eq!(hit.candidate.id, 10);
        assert!(pick_target("done", ItemKind::Event, None, Some("bins"), &pools()).is_none());
    }
}
