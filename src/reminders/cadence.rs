//! Pure decision rules for event reminder arming and the nag/grace state machine.

use chrono::{Datelike, NaiveDate};

use crate::events::ReminderPreset;

pub const GRACE_MINUTES: i64 = 30;
pub const NAG_MINUTES: i64 = 5;
pub const MAX_SNOOZE_MINUTES: i64 = 24 * 60;
pub const DEFAULT_EVENT_REMINDER_TIME: &str = "09:00";
const FIRST_FIRE_TOLERANCE_SECONDS: i64 = 60;

pub const MED_KEYS: &[&str] = &["morning_meds", "lunch_meds", "evening_meds"];

pub fn is_med_key(key: &str) -> bool {
    MED_KEYS.contains(&key)
}

/// Whole calendar months from `today` to `event_date`, floored on day-of-month.
pub fn months_until(event_date: NaiveDate, today: NaiveDate) -> i32 {
    let mut months = (event_date.year() - today.year()) * 12 + event_date.month() as i32
        - today.month() as i32;
    if event_date.day() < today.day() {
        months -= 1;
    }
    months
}

/// Backoff cadence: monthly on the matching day-of-month when two or more months out,
/// weekly from 28 days, silent 2..=7 days out, then the day before and the day itself.
pub fn should_remind_today(event_date: NaiveDate, today: NaiveDate, preset: ReminderPreset) -> bool {
    if preset != ReminderPreset::Standard {
        return false;
    }
    let days_until = (event_date - today).num_days();
    match days_until {
        d if d < 0 => false,
        0 | 1 => true,
        2..=7 => false,
        8..=28 => days_until % 7 == 0,
        _ => months_until(event_date, today) >= 2 && today.day() == event_date.day(),
    }
}

pub fn reminder_time(start_hhmm: Option<&str>, all_day: bool, days_until: i64) -> String {
    match start_hhmm {
        Some(start) if days_until == 0 && !all_day => start.to_string(),
        _ => DEFAULT_EVENT_REMINDER_TIME.to_string(),
    }
}

pub fn event_speak_text(
    title: &str,
    start_hhmm: Option<&str>,
    end_hhmm: Option<&str>,
    days_until: i64,
) -> String {
    let when = if days_until == 0 {
        "today".to_string()
    } else {
        format!("in {days_until} day(s)")
    };
    match (start_hhmm, end_hhmm) {
        (Some(start), Some(end)) => format!("{title} ({start}-{end}) {when}"),
        _ => format!("{title} {when}"),
    }
}

pub fn event_reminder_key(event_id: i32, arm_date: &str) -> String {
    format!("event:{event_id}:{arm_date}")
}

pub fn event_key_prefix(event_id: i32) -> String {
    format!("event:{event_id}:")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NagDecision {
    NotDue,
    Fire { next_fire_at: i64, first_fire: bool },
    Missed,
}

/// Decides what a tick does with an active reminder. The grace window closes
/// `GRACE_MINUTES` after the scheduled instant and `next_fire_at` never passes it; the
/// first tick after the window end records the miss.
pub fn nag_decision(now: i64, scheduled_at: i64, next_fire_at: i64) -> NagDecision {
    let window_end = scheduled_at + GRACE_MINUTES * 60;
    if now > window_end {
        return NagDecision::Missed;
    }
    if now < next_fire_at {
        return NagDecision::NotDue;
    }
    let first_fire = (next_fire_at - scheduled_at).abs() <= FIRST_FIRE_TOLERANCE_SECONDS;
    NagDecision::Fire {
        next_fire_at: (next_fire_at + NAG_MINUTES * 60).min(window_end),
        first_fire,
    }
}
