use serde::Deserialize;
use serde_json::Value;

use super::resolve::ResolvePools;
use super::{clean, extract, nullable_string, object_schema, string_enum, titled};
use crate::error::Result;
use crate::interfaces::providers::LlmProvider;
use crate::matcher::{self, Candidate, ItemKind, Scored, MATCH_THRESHOLD};

const RECLASSIFY_SYSTEM_PROMPT: &str = "The user wants an existing item turned into a \
different kind of item (task, reminder or event). Return the kind it should become, the \
item's title as they referred to it, and any date (YYYY-MM-DD) or time (HH:MM) they gave \
for the new item. Use `none` when no conversion is asked for.";

pub const MAX_CONFIRM_OPTIONS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
struct RawReclassify {
    target_type: String,
    title: Option<String>,
    date: Option<String>,
    time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReclassifyIntent {
    Convert {
        target: ItemKind,
        title_hint: Option<String>,
        date: Option<String>,
        time: Option<String>,
    },
    Abstain,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReclassifyChoice {
    Single(Scored),
    Confirm(Vec<Scored>),
    NoMatch,
}

pub fn reclassify_schema() -> Value {
    titled(
        "reclassify_intent",
        object_schema(vec![
            ("target_type", string_enum(&["task", "reminder", "event", "none"])),
            ("title", nullable_string()),
            ("date", nullable_string()),
            ("time", nullable_string()),
        ]),
    )
}

pub async fn extract_reclassify(llm: &dyn LlmProvider, text: &str) -> Result<ReclassifyIntent> {
    let raw: Option<RawReclassify> =
        extract(llm, RECLASSIFY_SYSTEM_PROMPT, text.trim(), reclassify_schema()).await?;
    let Some(raw) = raw else {
        return Ok(ReclassifyIntent::Abstain);
    };
    let Some(target) = ItemKind::parse(&raw.target_type) else {
        return Ok(ReclassifyIntent::Abstain);
    };
    Ok(ReclassifyIntent::Convert {
        target,
        title_hint: clean(raw.title),
        date: clean(raw.date),
        time: clean(raw.time),
    })
}

/// Ranks every item not already of the `target` kind against the hint. A near-tie at
/// the top asks for confirmation with up to three options instead of acting.
pub fn choose_source(hint: &str, target: ItemKind, pools: &ResolvePools) -> ReclassifyChoice {
    let candidates: Vec<Candidate> = [ItemKind::Task, ItemKind::Reminder, ItemKind::Event]
        .into_iter()
        .filter(|kind| *kind != target)
        .flat_map(|kind| pools.pool(kind).iter().cloned())
        .collect();
    let ranked: Vec<Scored> = matcher::rank(hint, &candidates)
        .into_iter()
        .filter(|s| s.score >= MATCH_THRESHOLD)
        .collect();
    if ranked.is_empty() {
        return ReclassifyChoice::NoMatch;
    }
    if matcher::is_near_tie(&ranked) {
        return ReclassifyChoice::Confirm(ranked.into_iter().take(MAX_CONFIRM_OPTIONS).collect());
    }
    match ranked.into_iter().next() {
        Some(top) => ReclassifyChoice::Single(top),
        None => ReclassifyChoice::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> ResolvePools {
        ResolvePools {
            tasks: vec![
                Candidate::new(ItemKind::Task, 1, "Dentist"),
                Candidate::new(ItemKind::Task, 2, "Bins"),
            ],
            reminders: vec![Candidate::new(ItemKind::Reminder, 5, "Dentist")],
            events: vec![Candidate::new(ItemKind::Event, 9, "Dentist")],
        }
    }

    #[test]
    fn near_tie_returns_up_to_three_options() {
        match choose_source("the dentist", ItemKind::Event, &pools()) {
            ReclassifyChoice::Confirm(options) => {
                let ids: Vec<(ItemKind, i32)> =
                    options.iter().map(|o| (o.candidate.kind, o.candidate.id)).collect();
                assert_eq!(ids, vec![(ItemKind::Task, 1), (ItemKind::Reminder, 5)]);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[test]
    fn clear_winner_is_single() {
        match choose_source("bins", ItemKind::Reminder, &pools()) {
            ReclassifyChoice::Single(hit) => assert_eq!(hit.candidate.id, 2),
            other => panic!("expected single, got {other:?}"),
        }
        assert_eq!(
            choose_source("hoover", ItemKind::Reminder, &pools()),
            ReclassifyChoice::NoMatch
        );
    }
}
