//! Turns validated intents into stored tasks, reminders, events and workday overrides.

use std::sync::Arc;

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::Serialize;

use crate::clock::{
    format_date, format_hhmm, local_timestamp, normalize_hhmm, parse_iso_date, SharedClock,
};
use crate::error::{KitchenPaError, Result};
use crate::events::{Event, EventStore, NewEventInput, ReminderPreset};
use crate::intents::schedule::{EventDraft, ItemDraft, ReminderDraft, ScheduleIntent, WorkdayDraft};
use crate::matcher::{Candidate, ItemKind};
use crate::reminders::{ActiveReminder, ArmRequest, ReminderEngine};
use crate::tasks::{Priority, Task, TaskStore};
use crate::workdays::{Workday, WorkdayStore};

pub mod timeparse;

pub const DEFAULT_EVENT_MINUTES: i64 = 30;
pub const DEFAULT_REMINDER_LEAD_MINUTES: i64 = 60;
pub const MAX_EVENT_SPAN_DAYS: i64 = 31;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Created {
    pub tasks: Vec<Task>,
    pub reminders: Vec<ActiveReminder>,
    pub events: Vec<Event>,
    pub workdays: Vec<Workday>,
    /// Reasons for mixed-batch items that were skipped.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl Created {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.reminders.is_empty()
            && self.events.is_empty()
            && self.workdays.is_empty()
    }

    pub fn count(&self) -> usize {
        self.tasks.len() + self.reminders.len() + self.events.len() + self.workdays.len()
    }
}

/// Date and `HH:MM` for a new reminder. A relative offset wins over everything; otherwise
/// the date defaults to today and may not be in the past, and the time defaults to one
/// hour from now.
pub fn reminder_slot(
    date: Option<&str>,
    time: Option<&str>,
    relative: Option<Duration>,
    now: DateTime<Tz>,
) -> Result<(NaiveDate, String)> {
    if let Some(offset) = relative {
        let at = now
            .checked_add_signed(offset)
            .ok_or_else(|| KitchenPaError::validation("reminder offset is too far ahead"))?;
        return Ok((at.date_naive(), format_hhmm(&at)));
    }
    let today = now.date_naive();
    let date = match date {
        Some(raw) => parse_iso_date(raw)?,
        None => today,
    };
    if date < today {
        return Err(KitchenPaError::validation(format!(
            "reminder date {} is in the past",
            format_date(date)
        )));
    }
    if let Some(raw) = time {
        let hhmm = normalize_hhmm(raw)
            .ok_or_else(|| KitchenPaError::validation(format!("invalid time `{raw}`")))?;
        return Ok((date, hhmm));
    }
    let later = now + Duration::minutes(DEFAULT_REMINDER_LEAD_MINUTES);
    if date == today {
        Ok((later.date_naive(), format_hhmm(&later)))
    } else {
        Ok((date, format_hhmm(&later)))
    }
}

fn end_after(start: &str, minutes: i64) -> Result<String> {
    let start_time = NaiveTime::parse_from_str(start, "%H:%M")
        .map_err(|_| KitchenPaError::validation(format!("invalid time `{start}`")))?;
    let (end, wrapped) = start_time.overflowing_add_signed(Duration::minutes(minutes));
    if wrapped != 0 {
        return Ok("23:59".to_string());
    }
    Ok(format_hhmm(&end))
}

fn span_error(days: i64) -> KitchenPaError {
    KitchenPaError::validation(format!(
        "event spans {days} days; the limit is {MAX_EVENT_SPAN_DAYS}"
    ))
}

/// One validated row per calendar day of the draft's range (inclusive). `text` supplies a
/// "for N days" span when the draft has no end date.
pub fn expand_event(draft: &EventDraft, text: &str) -> Result<Vec<NewEventInput>> {
    let title = draft
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| KitchenPaError::validation("event title is required"))?;
    let start_date = draft
        .date
        .as_deref()
        .ok_or_else(|| KitchenPaError::validation("event date is required"))
        .and_then(parse_iso_date)?;

    let end_date = match draft.end_date.as_deref() {
        Some(raw) => parse_iso_date(raw)?,
        None => match timeparse::duration_days(text) {
            Some(days) if days > MAX_EVENT_SPAN_DAYS => {
                return Err(span_error(days));
            }
            Some(days) => start_date
                .checked_add_days(Days::new((days - 1) as u64))
                .ok_or_else(|| KitchenPaError::validation("event end date is out of range"))?,
            None => start_date,
        },
    };
    if end_date < start_date {
        return Err(KitchenPaError::validation("event end date is before its start date"));
    }
    let span = (end_date - start_date).num_days() + 1;
    if span > MAX_EVENT_SPAN_DAYS {
        return Err(span_error(span));
    }

    let (start, end) = if draft.all_day {
        (None, None)
    } else {
        let start = draft
            .start_time
            .as_deref()
            .and_then(normalize_hhmm)
            .ok_or_else(|| KitchenPaError::validation("start time is required unless all day"))?;
        let end = match draft.end_time.as_deref().and_then(normalize_hhmm) {
            Some(end) => end,
            None => end_after(&start, DEFAULT_EVENT_MINUTES)?,
        };
        (Some(start), Some(end))
    };

    (0..span)
        .map(|offset| {
            let day = start_date
                .checked_add_days(Days::new(offset as u64))
                .ok_or_else(|| KitchenPaError::validation("event date is out of range"))?;
            NewEventInput {
                title: title.to_string(),
                event_date: format_date(day),
                start_hhmm: start.clone(),
                end_hhmm: end.clone(),
                all_day: draft.all_day,
                reminder_preset: ReminderPreset::Standard,
            }
            .validated()
        })
        .collect()
}

pub struct SchedulingEngine {
    tasks: Arc<TaskStore>,
    events: Arc<EventStore>,
    workdays: Arc<WorkdayStore>,
    reminders: Arc<ReminderEngine>,
    clock: SharedClock,
}

impl SchedulingEngine {
    pub fn new(
        tasks: Arc<TaskStore>,
        events: Arc<EventStore>,
        workdays: Arc<WorkdayStore>,
        reminders: Arc<ReminderEngine>,
        clock: SharedClock,
    ) -> Self {
        Self {
            tasks,
            events,
            workdays,
            reminders,
            clock,
        }
    }

    /// Persists everything the intent asks for, then re-arms today's reminders so new
    /// events are covered straight away.
    pub async fn apply(&self, intent: &ScheduleIntent, text: &str) -> Result<Created> {
        let mut created = Created::default();
        match intent {
            ScheduleIntent::None => return Ok(created),
            ScheduleIntent::Task { titles, priority } => {
                created.tasks = self.create_tasks(titles, *priority).await?;
            }
            ScheduleIntent::Reminder(draft) => {
                let relative = timeparse::relative_offset(text);
                created.reminders.push(self.create_reminder(draft, relative).await?);
            }
            ScheduleIntent::Event(draft) => {
                created.events = self.create_events(draft, text).await?;
            }
            ScheduleIntent::Workday { updates } => {
                for update in updates {
                    created.workdays.push(self.update_workday(update).await?);
                }
            }
            ScheduleIntent::Mixed { items } => {
                self.apply_mixed(items, text, &mut created).await?;
            }
        }
        if !created.is_empty() {
            self.reminders.arm_today().await?;
        }
        tracing::info!(created = created.count(), skipped = created.skipped.len(), "Applied schedule intent");
        Ok(created)
    }

    async fn apply_mixed(&self, items: &[ItemDraft], text: &str, created: &mut Created) -> Result<()> {
        let reminder_count = items
            .iter()
            .filter(|item| matches!(item, ItemDraft::Reminder(_)))
            .count();
        for item in items {
            let outcome = match item {
                ItemDraft::Task { title, priority } => match title {
                    Some(title) => self
                        .create_tasks(std::slice::from_ref(title), *priority)
                        .await
                        .map(|tasks| created.tasks.extend(tasks)),
                    None => Err(KitchenPaError::validation("task title is required")),
                },
                ItemDraft::Reminder(draft) => {
                    let relative = if reminder_count == 1 {
                        timeparse::relative_offset(text)
                    } else {
                        None
                    };
                    self.create_reminder(draft, relative)
                        .await
                        .map(|reminder| created.reminders.push(reminder))
                }
                ItemDraft::Event(draft) => self
                    .create_events(draft, "")
                    .await
                    .map(|events| created.events.extend(events)),
                ItemDraft::Workday(draft) => self
                    .update_workday(draft)
                    .await
                    .map(|workday| created.workdays.push(workday)),
            };
            match outcome {
                Ok(()) => {}
                Err(err) if err.is_validation() => {
                    tracing::debug!(reason = %err, "Skipping mixed item");
                    created.skipped.push(err.to_string());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub async fn create_tasks(&self, titles: &[String], priority: Priority) -> Result<Vec<Task>> {
        if titles.iter().all(|t| t.trim().is_empty()) {
            return Err(KitchenPaError::validation("task title is required"));
        }
        self.tasks
            .create_many(titles, priority, self.clock.now_ts())
            .await
    }

    pub async fn create_reminder(
        &self,
        draft: &ReminderDraft,
        relative: Option<Duration>,
    ) -> Result<ActiveReminder> {
        let title = draft
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| KitchenPaError::validation("reminder title is required"))?;
        let now = self.clock.now();
        let (date, hhmm) =
            reminder_slot(draft.date.as_deref(), draft.time.as_deref(), relative, now)?;
        let request = ArmRequest {
            reminder_key: format!("adhoc:{}", uuid::Uuid::new_v4()),
            label: title.to_string(),
            speak_text: title.to_string(),
            dose_date: format_date(date),
            next_fire_at: local_timestamp(date, &hhmm, self.clock.timezone())?,
            scheduled_hhmm: hhmm,
        };
        let (reminder, _) = self
            .reminders
            .store()
            .create_active_for_date(&request, now.timestamp())
            .await?;
        tracing::debug!(reminder_id = reminder.id, date = %reminder.dose_date, time = %reminder.scheduled_hhmm, "Created reminder");
        Ok(reminder)
    }

    pub async fn create_events(&self, draft: &EventDraft, text: &str) -> Result<Vec<Event>> {
        let rows = expand_event(draft, text)?;
        let now = self.clock.now_ts();
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            events.push(self.events.create(row, now).await?);
        }
        Ok(events)
    }

    pub async fn update_workday(&self, draft: &WorkdayDraft) -> Result<Workday> {
        let date = draft
            .date
            .as_deref()
            .ok_or_else(|| KitchenPaError::validation("workday date is required"))?;
        self.workdays
            .upsert(
                date,
                draft.is_work,
                draft.start_time.as_deref(),
                draft.end_time.as_deref(),
            )
            .await
    }

    /// Recreates `source` as a `target` item, carrying over its title and any date or
    /// time, then removes the original.
    pub async fn convert(
        &self,
        source: &Candidate,
        target: ItemKind,
        date: Option<String>,
        time: Option<String>,
    ) -> Result<Created> {
        if source.kind == target {
            return Err(KitchenPaError::validation(format!(
                "item is already a {}",
                target.as_str()
            )));
        }
        let today = self.clock.today();
        let carried = self.load_source(source).await?;
        let carried_date = carried
            .date
            .filter(|d| parse_iso_date(d).map(|d| d >= today).unwrap_or(false));

        let mut created = Created::default();
        match target {
            ItemKind::Task => {
                created.tasks = self
                    .create_tasks(std::slice::from_ref(&carried.title), Priority::Medium)
                    .await?;
            }
            ItemKind::Reminder => {
                let draft = ReminderDraft {
                    title: Some(carried.title.clone()),
                    date: date.or(carried_date),
                    time: time.or(carried.start),
                };
                created.reminders.push(self.create_reminder(&draft, None).await?);
            }
            ItemKind::Event => {
                let explicit_time = time.is_some();
                let start = time.or(carried.start);
                let end = if explicit_time { None } else { carried.end };
                let draft = EventDraft {
                    title: Some(carried.title.clone()),
                    date: date.or(carried_date).or_else(|| Some(format_date(today))),
                    end_date: None,
                    all_day: start.is_none(),
                    start_time: start,
                    end_time: end,
                };
                created.events = self.create_events(&draft, "").await?;
            }
        }

        self.remove_source(source).await?;
        self.reminders.arm_today().await?;
        tracing::info!(
            from = source.kind.as_str(),
            to = target.as_str(),
            id = source.id,
            "Reclassified item"
        );
        Ok(created)
    }

    async fn load_source(&self, source: &Candidate) -> Result<CarriedFields> {
        let missing = || {
            KitchenPaError::NotFound(format!("{} {}", source.kind.as_str(), source.id))
        };
        Ok(match source.kind {
            ItemKind::Task => {
                let task = self.tasks.get(source.id).await?.ok_or_else(missing)?;
                CarriedFields {
                    title: task.title,
                    date: None,
                    start: None,
                    end: None,
                }
            }
            ItemKind::Reminder => {
                let reminder = self
                    .reminders
                    .store()
                    .get(source.id)
                    .await?
                    .ok_or_else(missing)?;
                CarriedFields {
                    title: reminder.label,
                    date: Some(reminder.dose_date),
                    start: Some(reminder.scheduled_hhmm),
                    end: None,
                }
            }
            ItemKind::Event => {
                let event = self.events.get(source.id).await?.ok_or_else(missing)?;
                CarriedFields {
                    title: event.title,
                    date: Some(event.event_date),
                    start: event.start_hhmm,
                    end: event.end_hhmm,
                }
            }
        })
    }

    async fn remove_source(&self, source: &Candidate) -> Result<()> {
        let now = self.clock.now_ts();
        match source.kind {
            ItemKind::Task => {
                self.tasks.delete(source.id).await?;
            }
            ItemKind::Reminder => {
                self.reminders.store().delete(source.id, now).await?;
            }
            ItemKind::Event => {
                self.events.delete(source.id).await?;
                self.reminders.store().delete_event_reminders(source.id).await?;
            }
        }
        Ok(())
    }
}

struct CarriedFields {
    title: String,
    date: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use chrono_tz::Europe::London;

    fn draft(date: &str, end_date: Option<&str>, start: Option<&str>) -> EventDraft {
        EventDraft {
            title: Some("Camping".to_string()),
            date: Some(date.to_string()),
            end_date: end_date.map(str::to_string),
            start_time: start.map(str::to_string),
            end_time: None,
            all_day: start.is_none(),
        }
    }

    #[test]
    fn range_expands_inclusively_with_identical_rows() {
        let rows = expand_event(&draft("2024-06-01", Some("2024-06-03"), Some("10:00")), "").unwrap();
        let dates: Vec<&str> = rows.iter().map(|r| r.event_date.as_str()).collect();
        assert_eq!(dates, vec!["2024-06-01", "2024-06-02", "2024-06-03"]);
        for row in &rows {
            assert_eq!(row.title, "Camping");
            assert_eq!(row.start_hhmm.as_deref(), Some("10:00"));
            assert_eq!(row.end_hhmm.as_deref(), Some("10:30"));
            assert_eq!(row.reminder_preset, ReminderPreset::Standard);
        }
    }

    #[test]
    fn for_n_days_phrase_sets_the_span() {
        let rows = expand_event(&draft("2024-06-01", None, None), "camping for 4 days").unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[3].event_date, "2024-06-04");
    }

    #[test]
    fn invalid_events_are_rejected() {
        assert!(expand_event(&draft("2024-06-03", Some("2024-06-01"), None), "")
            .unwrap_err()
            .is_validation());
        let mut timed = draft("2024-06-01", None, None);
        timed.all_day = false;
        assert!(expand_event(&timed, "").unwrap_err().is_validation());
        let mut undated = draft("2024-06-01", None, None);
        undated.date = None;
        assert!(expand_event(&undated, "").unwrap_err().is_validation());
        assert!(expand_event(&draft("2024-01-01", Some("2024-03-01"), None), "")
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn huge_day_counts_are_rejected_before_date_math() {
        let err = expand_event(&draft("2024-06-01", None, None), "camping for 999999999999999 days")
            .unwrap_err();
        assert!(err.is_validation());
        assert!(expand_event(&draft("2024-06-01", None, None), "away for 32 days")
            .unwrap_err()
            .is_validation());
        assert_eq!(
            expand_event(&draft("2024-06-01", None, None), "away for 31 days").unwrap().len(),
            31
        );
    }

    #[test]
    fn late_start_end_clamps_to_midnight() {
        assert_eq!(end_after("23:45", 30).unwrap(), "23:59");
    }

    #[test]
    fn reminder_slot_defaults_and_overrides() {
        let clock = FixedClock::at(London, "2024-06-01", "14:10").unwrap();
        let now = clock.now();

        let (date, time) = reminder_slot(None, None, None, now).unwrap();
        assert_eq!((format_date(date), time.as_str()), ("2024-06-01".to_string(), "15:10"));

        let (date, time) = reminder_slot(Some("2024-06-02"), Some("10am"), None, now).unwrap();
        assert_eq!((format_date(date), time.as_str()), ("2024-06-02".to_string(), "10:00"));

        let (_, time) =
            reminder_slot(Some("2024-06-02"), Some("10:00"), Some(Duration::minutes(20)), now)
                .unwrap();
        assert_eq!(time, "14:30");

        assert!(reminder_slot(Some("2024-05-31"), None, None, now)
            .unwrap_err()
            .is_validation());

        let far = timeparse::relative_offset("remind me in 9999999999 hours");
        assert!(far.is_some());
        assert!(reminder_slot(None, None, far, now).unwrap_err().is_validation());
        let huge = timeparse::relative_offset("remind me in 9999999999999 hours");
        assert_eq!(huge, None);
        let (_, time) = reminder_slot(None, None, huge, now).unwrap();
        assert_eq!(time, "15:10");

        let late = FixedClock::at(London, "2024-06-01", "23:30").unwrap().now();
        let (date, time) = reminder_slot(None, None, None, late).unwrap();
        assert_eq!((format_date(date), time.as_str()), ("2024-06-02".to_string(), "00:30"));
    }
}
