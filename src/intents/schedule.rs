use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{clean, extract, nullable_enum, nullable_string, object_schema, string_enum, titled};
use crate::clock::format_date;
use crate::error::Result;
use crate::interfaces::providers::LlmProvider;
use crate::tasks::Priority;

const SCHEDULE_SYSTEM_PROMPT: &str = "You turn a household instruction into a structured \
scheduling action. Use ISO dates (YYYY-MM-DD) and 24h HH:MM times, resolving relative days \
against the current date given in the message. Pick `task` for to-dos without a time, \
`reminder` for things the user wants to be reminded about, `event` for appointments or \
calendar entries, `workday` for changes to working days, `mixed` when the message asks for \
several different kinds of item, and `none` when nothing should be scheduled.";

const MIXED_SYSTEM_PROMPT: &str = "Split the household instruction into separate items. Each \
item is a task, a reminder, an event or a workday change. Use ISO dates (YYYY-MM-DD) and 24h \
HH:MM times, resolving relative days against the current date given in the message. Keep each \
title short and drop the scheduling words from it.";

static TASK_CANDIDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bi(?:'ve)?\s+(?:need|have|got)\s+to\s+(.+?)(?:\s+and\s+|\s+then\s+|[,.;!?]|$)")
        .unwrap()
});

static REMINDER_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bremind(?:er|ers)?\b").unwrap());
static EVENT_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:appointment|appt|event|meeting|party|calendar|booked|birthday)\b").unwrap()
});
static TASK_WORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:i(?:'ve)?\s+(?:need|have|got)\s+to|to-?do|tasks?|my\s+list)\b").unwrap()
});
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\band\b|,").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    Event,
    Reminder,
    Task,
    Workday,
    Mixed,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Task,
    Reminder,
    Event,
    Workday,
}

#[derive(Debug, Clone, Deserialize)]
struct RawItem {
    kind: ItemType,
    title: Option<String>,
    date: Option<String>,
    end_date: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    all_day: Option<bool>,
    priority: Option<String>,
    is_work: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawWorkday {
    date: String,
    is_work: bool,
    start_time: Option<String>,
    end_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSchedule {
    action: ScheduleAction,
    title: Option<String>,
    date: Option<String>,
    end_date: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    all_day: Option<bool>,
    priority: Option<String>,
    #[serde(default)]
    tasks: Vec<String>,
    #[serde(default)]
    items: Vec<RawItem>,
    #[serde(default)]
    workdays: Vec<RawWorkday>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMixed {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderDraft {
    pub title: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDraft {
    pub title: Option<String>,
    pub date: Option<String>,
    pub end_date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub all_day: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkdayDraft {
    pub date: Option<String>,
    pub is_work: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ItemDraft {
    Task { title: Option<String>, priority: Priority },
    Reminder(ReminderDraft),
    Event(EventDraft),
    Workday(WorkdayDraft),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ScheduleIntent {
    Task { titles: Vec<String>, priority: Priority },
    Reminder(ReminderDraft),
    Event(EventDraft),
    Workday { updates: Vec<WorkdayDraft> },
    Mixed { items: Vec<ItemDraft> },
    None,
}

fn item_schema() -> Value {
    object_schema(vec![
        ("kind", string_enum(&["task", "reminder", "event", "workday"])),
        ("title", nullable_string()),
        ("date", nullable_string()),
        ("end_date", nullable_string()),
        ("start_time", nullable_string()),
        ("end_time", nullable_string()),
        ("all_day", json!({"type": ["boolean", "null"]})),
        ("priority", nullable_enum(&["vital", "medium", "trivial"])),
        ("is_work", json!({"type": ["boolean", "null"]})),
    ])
}

pub fn schedule_schema() -> Value {
    let workday = object_schema(vec![
        ("date", json!({"type": "string"})),
        ("is_work", json!({"type": "boolean"})),
        ("start_time", nullable_string()),
        ("end_time", nullable_string()),
    ]);
    titled(
        "schedule_intent",
        object_schema(vec![
            (
                "action",
                string_enum(&["event", "reminder", "task", "workday", "mixed", "none"]),
            ),
            ("title", nullable_string()),
            ("date", nullable_string()),
            ("end_date", nullable_string()),
            ("start_time", nullable_string()),
            ("end_time", nullable_string()),
            ("all_day", json!({"type": ["boolean", "null"]})),
            ("priority", nullable_enum(&["vital", "medium", "trivial"])),
            ("tasks", json!({"type": "array", "items": {"type": "string"}})),
            ("items", json!({"type": "array", "items": item_schema()})),
            ("workdays", json!({"type": "array", "items": workday})),
        ]),
    )
}

pub fn mixed_schema() -> Value {
    titled(
        "mixed_items",
        object_schema(vec![(
            "items",
            json!({"type": "array", "items": item_schema()}),
        )]),
    )
}

fn dated_prompt(text: &str, today: NaiveDate) -> String {
    format!(
        "Current date: {} ({}).\nInstruction: {}",
        format_date(today),
        today.format("%A"),
        text.trim()
    )
}

/// At least two of the reminder/event/task keyword classes plus a conjunction or comma.
pub fn looks_mixed(text: &str) -> bool {
    let classes = [&*REMINDER_WORD_RE, &*EVENT_WORD_RE, &*TASK_WORD_RE]
        .iter()
        .filter(|re| re.is_match(text))
        .count();
    classes >= 2 && SEPARATOR_RE.is_match(text)
}

/// "I need/have/got to X" phrases, each cut at the next conjunction or punctuation.
pub fn task_candidates(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in TASK_CANDIDATE_RE.captures_iter(text) {
        let Some(found) = caps.get(1) else { continue };
        let candidate = found.as_str().trim().to_string();
        if candidate.is_empty() {
            continue;
        }
        if !overlaps_any(&candidate, &out) {
            out.push(candidate);
        }
    }
    out
}

fn overlaps_any(candidate: &str, existing: &[String]) -> bool {
    let lower = candidate.to_lowercase();
    existing.iter().any(|title| {
        let title = title.to_lowercase();
        title.contains(&lower) || lower.contains(&title)
    })
}

/// Adds regex candidates that no existing title already covers.
pub fn merge_task_titles(mut titles: Vec<String>, candidates: Vec<String>) -> Vec<String> {
    for candidate in candidates {
        if !overlaps_any(&candidate, &titles) {
            titles.push(candidate);
        }
    }
    titles
}

/// Action forced by how the instruction starts, if any.
pub fn leading_action(text: &str) -> Option<ScheduleAction> {
    let lower = text.trim().to_lowercase();
    if lower.starts_with("remind me") {
        Some(ScheduleAction::Reminder)
    } else if lower.starts_with("i need to") {
        Some(ScheduleAction::Task)
    } else if lower.starts_with("add an event") || lower.starts_with("add event") {
        Some(ScheduleAction::Event)
    } else {
        None
    }
}

fn item_draft(item: RawItem) -> ItemDraft {
    match item.kind {
        ItemType::Task => ItemDraft::Task {
            title: clean(item.title),
            priority: Priority::parse_or_default(item.priority.as_deref()),
        },
        ItemType::Reminder => ItemDraft::Reminder(ReminderDraft {
            title: clean(item.title),
            date: clean(item.date),
            time: clean(item.start_time),
        }),
        ItemType::Event => ItemDraft::Event(EventDraft {
            title: clean(item.title),
            date: clean(item.date),
            end_date: clean(item.end_date),
            start_time: clean(item.start_time),
            end_time: clean(item.end_time),
            all_day: item.all_day.unwrap_or(false),
        }),
        ItemType::Workday => ItemDraft::Workday(WorkdayDraft {
            date: clean(item.date),
            is_work: item.is_work.unwrap_or(true),
            start_time: clean(item.start_time),
            end_time: clean(item.end_time),
        }),
    }
}

fn single_intent(raw: &RawSchedule, action: ScheduleAction, text: &str) -> ScheduleIntent {
    let title = clean(raw.title.clone());
    match action {
        ScheduleAction::Task => {
            let mut titles: Vec<String> = raw.tasks.iter().filter_map(|t| clean(Some(t.clone()))).collect();
            if titles.is_empty() {
                if let Some(title) = title {
                    titles.push(title);
                }
            }
            let titles = merge_task_titles(titles, task_candidates(text));
            if titles.is_empty() {
                return ScheduleIntent::None;
            }
            ScheduleIntent::Task {
                titles,
                priority: Priority::parse_or_default(raw.priority.as_deref()),
            }
        }
        ScheduleAction::Reminder => ScheduleIntent::Reminder(ReminderDraft {
            title,
            date: clean(raw.date.clone()),
            time: clean(raw.start_time.clone()),
        }),
        ScheduleAction::Event => ScheduleIntent::Event(EventDraft {
            title,
            date: clean(raw.date.clone()),
            end_date: clean(raw.end_date.clone()),
            start_time: clean(raw.start_time.clone()),
            end_time: clean(raw.end_time.clone()),
            all_day: raw.all_day.unwrap_or(false),
        }),
        ScheduleAction::Workday => {
            let updates: Vec<WorkdayDraft> = raw
                .workdays
                .iter()
                .map(|w| WorkdayDraft {
                    date: clean(Some(w.date.clone())),
                    is_work: w.is_work,
                    start_time: clean(w.start_time.clone()),
                    end_time: clean(w.end_time.clone()),
                })
                .collect();
            if updates.is_empty() {
                return ScheduleIntent::None;
            }
            ScheduleIntent::Workday { updates }
        }
        ScheduleAction::Mixed => mixed_intent(raw.items.clone(), text),
        ScheduleAction::None => {
            let candidates = task_candidates(text);
            if candidates.is_empty() {
                ScheduleIntent::None
            } else {
                ScheduleIntent::Task {
                    titles: candidates,
                    priority: Priority::Medium,
                }
            }
        }
    }
}

fn mixed_intent(items: Vec<RawItem>, text: &str) -> ScheduleIntent {
    let mut drafts: Vec<ItemDraft> = items.into_iter().map(item_draft).collect();
    let task_titles: Vec<String> = drafts
        .iter()
        .filter_map(|d| match d {
            ItemDraft::Task { title, .. } => title.clone(),
            _ => None,
        })
        .collect();
    let extra = merge_task_titles(task_titles.clone(), task_candidates(text));
    for title in extra.into_iter().skip(task_titles.len()) {
        drafts.push(ItemDraft::Task {
            title: Some(title),
            priority: Priority::Medium,
        });
    }
    if drafts.is_empty() {
        ScheduleIntent::None
    } else {
        ScheduleIntent::Mixed { items: drafts }
    }
}

/// Full schedule extraction: model call, forced decomposition for mixed-looking input,
/// leading-phrase override and regex task augmentation.
pub async fn extract_schedule(
    llm: &dyn LlmProvider,
    text: &str,
    today: NaiveDate,
) -> Result<ScheduleIntent> {
    let prompt = dated_prompt(text, today);
    let raw: Option<RawSchedule> =
        extract(llm, SCHEDULE_SYSTEM_PROMPT, &prompt, schedule_schema()).await?;

    let mut action = raw
        .as_ref()
        .map(|r| r.action)
        .unwrap_or(ScheduleAction::None);

    if action != ScheduleAction::Mixed && looks_mixed(text) {
        let mixed: Option<RawMixed> =
            extract(llm, MIXED_SYSTEM_PROMPT, &prompt, mixed_schema()).await?;
        if let Some(mixed) = mixed.filter(|m| m.items.len() >= 2) {
            tracing::debug!(items = mixed.items.len(), "Forced mixed decomposition");
            return Ok(mixed_intent(mixed.items, text));
        }
    }

    if action != ScheduleAction::Mixed {
        if let Some(forced) = leading_action(text) {
            if forced != action {
                tracing::debug!(?action, ?forced, "Leading phrase overrides extracted action");
            }
            action = forced;
        }
    }

    let raw = raw.unwrap_or(RawSchedule {
        action,
        title: None,
        date: None,
        end_date: None,
        start_time: None,
        end_time: None,
        all_day: None,
        priority: None,
        tasks: Vec::new(),
        items: Vec::new(),
        workdays: Vec::new(),
    });
    Ok(single_intent(&raw, action, text))
}
