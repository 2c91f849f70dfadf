//! "What's on today" aggregation and the dashboard snapshot. No model calls.

use serde::Serialize;

use crate::events::Event;
use crate::reminders::cadence::is_med_key;
use crate::reminders::{ActiveReminder, ReminderStatus};
use crate::tasks::Task;
use crate::workdays::Workday;

#[derive(Debug, Clone, Serialize)]
pub struct TodaySummary {
    pub date: String,
    pub text: String,
    pub events: Vec<Event>,
    pub tasks: Vec<Task>,
    pub alerts: Vec<ActiveReminder>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub now: String,
    pub date: String,
    pub today_summary: String,
    pub workday: Workday,
    pub alerts: Vec<ActiveReminder>,
    pub next_task: Option<Task>,
}

/// Active, non-medication reminders for the summary.
pub fn summary_alerts(reminders: Vec<ActiveReminder>) -> Vec<ActiveReminder> {
    reminders
        .into_iter()
        .filter(|r| r.status == ReminderStatus::Active && !is_med_key(&r.reminder_key))
        .collect()
}

fn describe_event(event: &Event) -> String {
    match (&event.start_hhmm, &event.end_hhmm) {
        (Some(start), Some(end)) => format!("{} ({start}-{end})", event.title),
        _ => format!("{} (all day)", event.title),
    }
}

pub(crate) fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("1 {one}")
    } else {
        format!("{count} {many}")
    }
}

/// One spoken-style line covering events, open tasks and outstanding alerts. `tasks`
/// must already be in presentation order.
pub fn compose_summary(events: &[Event], tasks: &[Task], alerts: &[ActiveReminder]) -> String {
    if events.is_empty() && tasks.is_empty() && alerts.is_empty() {
        return "Nothing on today.".to_string();
    }
    let mut parts = Vec::new();
    if !events.is_empty() {
        let listed: Vec<String> = events.iter().map(describe_event).collect();
        parts.push(format!(
            "{} today: {}.",
            plural(events.len(), "event", "events"),
            listed.join(", ")
        ));
    }
    if let Some(next) = tasks.first() {
        parts.push(format!(
            "{} open, next up: {}.",
            plural(tasks.len(), "task", "tasks"),
            next.title
        ));
    }
    if !alerts.is_empty() {
        let listed: Vec<String> = alerts
            .iter()
            .map(|a| format!("{} at {}", a.label, a.scheduled_hhmm))
            .collect();
        parts.push(format!(
            "{} still active: {}.",
            plural(alerts.len(), "reminder", "reminders"),
            listed.join(", ")
        ));
    }
    parts.join(" ")
}
