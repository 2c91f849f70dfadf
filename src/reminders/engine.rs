use std::sync::Arc;

use chrono::NaiveDate;
use rand::rngs::SysRng;
use rand::TryRng;
use serde::Serialize;

use super::cadence::{self, NagDecision};
use super::{ArmRequest, DayType, ReminderAction, ReminderStore};
use crate::clock::{format_date, local_timestamp, SharedClock};
use crate::error::Result;
use crate::events::EventStore;
use crate::workdays::WorkdayStore;

const DUE_BATCH: i64 = 20;

const ALERT_TEMPLATES: &[&str] = &[
    "Hey {name}, {text}",
    "{name}, {text}",
    "Hi {name}, {text}",
    "Quick reminder, {name}: {text}",
    "{text}, {name}",
    "Just a heads up, {name}: {text}",
    "Reminder, {name}: {text}",
    "{name}, just a reminder: {text}",
    "Heads up, {name}: {text}",
    "{name}, quick note: {text}",
    "Reminder for you, {name}: {text}",
];

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ArmReport {
    pub date: String,
    pub day_type: Option<DayType>,
    pub schedules_armed: usize,
    pub events_armed: usize,
}

/// A reminder that fired on this tick. `speech` is set when the alert should be spoken.
#[derive(Debug, Clone, Serialize)]
pub struct FiredAlert {
    pub reminder_id: i32,
    pub reminder_key: String,
    pub label: String,
    pub speak_text: String,
    pub speech: Option<String>,
    pub fired_at: i64,
}

pub fn format_alert_speech(template_index: usize, user_name: &str, text: &str) -> String {
    let template = ALERT_TEMPLATES[template_index % ALERT_TEMPLATES.len()];
    template.replace("{name}", user_name).replace("{text}", text)
}

fn random_template_index() -> usize {
    let mut bytes = [0u8; 8];
    let mut rng = SysRng;
    match rng.try_fill_bytes(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes) as usize,
        Err(_) => 0,
    }
}

pub struct ReminderEngine {
    reminders: Arc<ReminderStore>,
    events: Arc<EventStore>,
    workdays: Arc<WorkdayStore>,
    clock: SharedClock,
    user_name: String,
}

impl ReminderEngine {
    pub fn new(
        reminders: Arc<ReminderStore>,
        events: Arc<EventStore>,
        workdays: Arc<WorkdayStore>,
        clock: SharedClock,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            reminders,
            events,
            workdays,
            clock,
            user_name: user_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.reminders
    }

    pub async fn arm_today(&self) -> Result<ArmReport> {
        self.arm_for_date(self.clock.today()).await
    }

    /// Materialises recurring schedules for the date's day type, then event reminders.
    /// Safe to repeat: existing `(reminder_key, date)` rows are left alone.
    pub async fn arm_for_date(&self, date: NaiveDate) -> Result<ArmReport> {
        let tz = self.clock.timezone();
        let now = self.clock.now_ts();
        let date_str = format_date(date);
        let workday = self.workdays.get(&date_str).await?;
        let day_type = if workday.is_work {
            DayType::Work
        } else {
            DayType::Off
        };

        let mut report = ArmReport {
            date: date_str.clone(),
            day_type: Some(day_type),
            ..ArmReport::default()
        };

        for schedule in self.reminders.schedules_for_day_type(day_type).await? {
            let request = ArmRequest {
                reminder_key: schedule.reminder_key,
                label: schedule.label,
                speak_text: schedule.speak_text,
                dose_date: date_str.clone(),
                next_fire_at: local_timestamp(date, &schedule.time_hhmm, tz)?,
                scheduled_hhmm: schedule.time_hhmm,
            };
            let (_, created) = self.reminders.create_active_for_date(&request, now).await?;
            if created {
                report.schedules_armed += 1;
            }
        }

        for event in self.events.list_from_date(&date_str).await? {
            if event.title.trim().eq_ignore_ascii_case("work") {
                continue;
            }
            let Ok(event_date) = crate::clock::parse_iso_date(&event.event_date) else {
                tracing::warn!(event_id = event.id, "Skipping event with invalid date");
                continue;
            };
            if !cadence::should_remind_today(event_date, date, event.reminder_preset) {
                continue;
            }
            let days_until = (event_date - date).num_days();
            let scheduled_hhmm =
                cadence::reminder_time(event.start_hhmm.as_deref(), event.all_day, days_until);
            let request = ArmRequest {
                reminder_key: cadence::event_reminder_key(event.id, &date_str),
                label: event.title.clone(),
                speak_text: cadence::event_speak_text(
                    &event.title,
                    event.start_hhmm.as_deref(),
                    event.end_hhmm.as_deref(),
                    days_until,
                ),
                dose_date: date_str.clone(),
                next_fire_at: local_timestamp(date, &scheduled_hhmm, tz)?,
                scheduled_hhmm,
            };
            let (_, created) = self.reminders.create_active_for_date(&request, now).await?;
            if created {
                report.events_armed += 1;
            }
        }

        if report.schedules_armed + report.events_armed > 0 {
            tracing::info!(
                date = %report.date,
                schedules = report.schedules_armed,
                events = report.events_armed,
                "Armed reminders"
            );
        }
        Ok(report)
    }

    /// One pass of the nag loop. Concurrent ticks are harmless: every transition is a
    /// guarded update and a lost compare-and-set skips the reminder.
    pub async fn tick(&self) -> Result<Vec<FiredAlert>> {
        let tz = self.clock.timezone();
        let now = self.clock.now_ts();
        let mut fired = Vec::new();

        for reminder in self.reminders.due_active(now, DUE_BATCH).await? {
            let dose_date = match crate::clock::parse_iso_date(&reminder.dose_date) {
                Ok(date) => date,
                Err(err) => {
                    tracing::warn!(reminder_id = reminder.id, error = %err, "Bad reminder date");
                    continue;
                }
            };
            let scheduled_at = local_timestamp(dose_date, &reminder.scheduled_hhmm, tz)?;

            match cadence::nag_decision(now, scheduled_at, reminder.next_fire_at) {
                NagDecision::NotDue => {}
                NagDecision::Missed => {
                    if self.reminders.mark_missed(reminder.id, now).await? {
                        tracing::info!(reminder_id = reminder.id, key = %reminder.reminder_key, "Reminder missed");
                    }
                }
                NagDecision::Fire {
                    next_fire_at,
                    first_fire,
                } => {
                    let won = self
                        .reminders
                        .advance_next_fire(reminder.id, reminder.next_fire_at, next_fire_at)
                        .await?;
                    if !won {
                        continue;
                    }
                    self.reminders
                        .log_action(&reminder.reminder_key, ReminderAction::Fired, now)
                        .await?;
                    let speech = if cadence::is_med_key(&reminder.reminder_key) || first_fire {
                        Some(format_alert_speech(
                            random_template_index(),
                            &self.user_name,
                            &reminder.speak_text,
                        ))
                    } else {
                        None
                    };
                    tracing::info!(
                        reminder_id = reminder.id,
                        due = %reminder.scheduled_hhmm,
                        label = %reminder.label,
                        spoken = speech.is_some(),
                        "Reminder fired"
                    );
                    fired.push(FiredAlert {
                        reminder_id: reminder.id,
                        reminder_key: reminder.reminder_key,
                        label: reminder.label,
                        speak_text: reminder.speak_text,
                        speech,
                        fired_at: now,
                    });
                }
            }
        }
        Ok(fired)
    }
}
