use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

use crate::db::{SqlitePool, SqlitePooledConn};
use crate::error::{KitchenPaError, Result};

pub mod cadence;
pub mod engine;
mod schema;

use schema::{active_reminders, reminder_log, reminder_schedules};

pub use engine::{ArmReport, FiredAlert, ReminderEngine};

const DEFAULT_SCHEDULES: &[(&str, &str, &str, &str, DayType)] = &[
    ("morning_meds", "Morning meds", "Time for morning meds.", "07:30", DayType::Work),
    ("evening_meds", "Evening meds", "Time for evening meds.", "18:00", DayType::Work),
    ("morning_meds", "Morning meds", "Time for morning meds.", "08:30", DayType::Off),
    ("lunch_meds", "Lunch meds", "Time for lunch meds.", "13:00", DayType::Off),
    ("evening_meds", "Evening meds", "Time for evening meds.", "18:00", DayType::Off),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Work,
    Off,
}

impl DayType {
    pub fn as_str(self) -> &'static str {
        match self {
            DayType::Work => "work",
            DayType::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Active,
    Done,
    Missed,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderStatus::Active => "active",
            ReminderStatus::Done => "done",
            ReminderStatus::Missed => "missed",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "done" => ReminderStatus::Done,
            "missed" => ReminderStatus::Missed,
            _ => ReminderStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderAction {
    Fired,
    Done,
    Missed,
    Snoozed,
    Deleted,
}

impl ReminderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderAction::Fired => "fired",
            ReminderAction::Done => "done",
            ReminderAction::Missed => "missed",
            ReminderAction::Snoozed => "snoozed",
            ReminderAction::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderSchedule {
    pub id: i32,
    pub reminder_key: String,
    pub label: String,
    pub speak_text: String,
    pub time_hhmm: String,
    pub day_type: String,
    pub repeat_every_min: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveReminder {
    pub id: i32,
    pub reminder_key: String,
    pub label: String,
    pub speak_text: String,
    pub dose_date: String,
    pub scheduled_hhmm: String,
    pub status: ReminderStatus,
    pub next_fire_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReminderLogEntry {
    pub id: i32,
    pub reminder_key: String,
    pub action: String,
    pub ts: i64,
}

/// One reminder instance to materialise for a date.
#[derive(Debug, Clone)]
pub struct ArmRequest {
    pub reminder_key: String,
    pub label: String,
    pub speak_text: String,
    pub dose_date: String,
    pub scheduled_hhmm: String,
    pub next_fire_at: i64,
}

#[derive(Queryable)]
struct ScheduleRow {
    id: i32,
    reminder_key: String,
    label: String,
    speak_text: String,
    time_hhmm: String,
    day_type: String,
    repeat_every_min: i32,
    enabled: bool,
}

#[derive(Insertable)]
#[diesel(table_name = reminder_schedules)]
struct NewSchedule<'a> {
    reminder_key: &'a str,
    label: &'a str,
    speak_text: &'a str,
    time_hhmm: &'a str,
    day_type: &'a str,
    repeat_every_min: i32,
    enabled: bool,
}

#[derive(Queryable)]
struct ActiveRow {
    id: i32,
    reminder_key: String,
    label: String,
    speak_text: String,
    dose_date: String,
    scheduled_hhmm: String,
    status: String,
    next_fire_at: i64,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = active_reminders)]
struct NewActive<'a> {
    reminder_key: &'a str,
    label: &'a str,
    speak_text: &'a str,
    dose_date: &'a str,
    scheduled_hhmm: &'a str,
    status: &'a str,
    next_fire_at: i64,
    created_at: i64,
}

#[derive(Queryable)]
struct LogRow {
    id: i32,
    reminder_key: String,
    action: String,
    ts: i64,
}

#[derive(Insertable)]
#[diesel(table_name = reminder_log)]
struct NewLog<'a> {
    reminder_key: &'a str,
    action: &'a str,
    ts: i64,
}

pub struct ReminderStore {
    pool: SqlitePool,
}

impl ReminderStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = crate::db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the default medication schedules when no schedule exists yet.
    pub async fn seed_defaults_if_empty(&self) -> Result<usize> {
        let mut conn = self.conn().await?;
        let existing: i64 = reminder_schedules::table
            .count()
            .get_result(&mut conn)
            .await?;
        if existing > 0 {
            return Ok(0);
        }
        let mut inserted = 0;
        for (key, label, speak, time, day_type) in DEFAULT_SCHEDULES.iter().copied() {
            let row = NewSchedule {
                reminder_key: key,
                label,
                speak_text: speak,
                time_hhmm: time,
                day_type: day_type.as_str(),
                repeat_every_min: cadence::NAG_MINUTES as i32,
                enabled: true,
            };
            inserted += diesel::insert_into(reminder_schedules::table)
                .values(&row)
                .execute(&mut conn)
                .await?;
        }
        tracing::info!(inserted, "Seeded default reminder schedules");
        Ok(inserted)
    }

    pub async fn schedules_for_day_type(&self, day_type: DayType) -> Result<Vec<ReminderSchedule>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ScheduleRow> = reminder_schedules::table
            .filter(reminder_schedules::enabled.eq(true))
            .filter(reminder_schedules::day_type.eq(day_type.as_str()))
            .order(reminder_schedules::time_hhmm.asc())
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ReminderSchedule {
                id: row.id,
                reminder_key: row.reminder_key,
                label: row.label,
                speak_text: row.speak_text,
                time_hhmm: row.time_hhmm,
                day_type: row.day_type,
                repeat_every_min: row.repeat_every_min,
                enabled: row.enabled,
            })
            .collect())
    }

    /// Creates the row for `(reminder_key, dose_date)` unless one exists. Returns the
    /// stored row and whether this call inserted it.
    pub async fn create_active_for_date(
        &self,
        request: &ArmRequest,
        now: i64,
    ) -> Result<(ActiveReminder, bool)> {
        let mut conn = self.conn().await?;
        let new = NewActive {
            reminder_key: &request.reminder_key,
            label: &request.label,
            speak_text: &request.speak_text,
            dose_date: &request.dose_date,
            scheduled_hhmm: &request.scheduled_hhmm,
            status: ReminderStatus::Active.as_str(),
            next_fire_at: request.next_fire_at,
            created_at: now,
        };
        let inserted = diesel::insert_or_ignore_into(active_reminders::table)
            .values(&new)
            .execute(&mut conn)
            .await?;

        let row: ActiveRow = active_reminders::table
            .filter(active_reminders::reminder_key.eq(&request.reminder_key))
            .filter(active_reminders::dose_date.eq(&request.dose_date))
            .first(&mut conn)
            .await?;
        Ok((map_active(row), inserted > 0))
    }

    pub async fn get(&self, id: i32) -> Result<Option<ActiveReminder>> {
        let mut conn = self.conn().await?;
        let row = active_reminders::table
            .filter(active_reminders::id.eq(id))
            .first::<ActiveRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(map_active))
    }

    pub async fn due_active(&self, now: i64, limit: i64) -> Result<Vec<ActiveReminder>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ActiveRow> = active_reminders::table
            .filter(active_reminders::status.eq(ReminderStatus::Active.as_str()))
            .filter(active_reminders::next_fire_at.le(now))
            .order(active_reminders::id.asc())
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_active).collect())
    }

    /// Compare-and-set on `next_fire_at`; false when another tick already moved it or the
    /// reminder left the active state.
    pub async fn advance_next_fire(&self, id: i32, expected: i64, next: i64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            active_reminders::table
                .filter(active_reminders::id.eq(id))
                .filter(active_reminders::status.eq(ReminderStatus::Active.as_str()))
                .filter(active_reminders::next_fire_at.eq(expected)),
        )
        .set(active_reminders::next_fire_at.eq(next))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    pub async fn mark_done(&self, id: i32, now: i64) -> Result<bool> {
        self.transition(id, ReminderStatus::Done, ReminderAction::Done, now)
            .await
    }

    pub async fn mark_missed(&self, id: i32, now: i64) -> Result<bool> {
        self.transition(id, ReminderStatus::Missed, ReminderAction::Missed, now)
            .await
    }

    /// Pushes `next_fire_at` out by `minutes`, which must lie in `1..=MAX_SNOOZE_MINUTES`.
    pub async fn snooze(&self, id: i32, minutes: i64, now: i64) -> Result<Option<ActiveReminder>> {
        if !(1..=cadence::MAX_SNOOZE_MINUTES).contains(&minutes) {
            return Err(KitchenPaError::validation(format!(
                "snooze must be between 1 and {} minutes",
                cadence::MAX_SNOOZE_MINUTES
            )));
        }
        let next = now + minutes * 60;
        let updated = {
            let mut conn = self.conn().await?;
            diesel::update(
                active_reminders::table
                    .filter(active_reminders::id.eq(id))
                    .filter(active_reminders::status.eq(ReminderStatus::Active.as_str())),
            )
            .set(active_reminders::next_fire_at.eq(next))
            .execute(&mut conn)
            .await?
        };
        if updated == 0 {
            return Ok(None);
        }
        let reminder = self.get(id).await?;
        if let Some(reminder) = &reminder {
            self.log_action(&reminder.reminder_key, ReminderAction::Snoozed, now)
                .await?;
        }
        Ok(reminder)
    }

    pub async fn delete(&self, id: i32, now: i64) -> Result<bool> {
        let Some(reminder) = self.get(id).await? else {
            return Ok(false);
        };
        let deleted = {
            let mut conn = self.conn().await?;
            diesel::delete(active_reminders::table.filter(active_reminders::id.eq(id)))
                .execute(&mut conn)
                .await?
        };
        if deleted > 0 {
            self.log_action(&reminder.reminder_key, ReminderAction::Deleted, now)
                .await?;
        }
        Ok(deleted > 0)
    }

    pub async fn list_for_date(&self, dose_date: &str) -> Result<Vec<ActiveReminder>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ActiveRow> = active_reminders::table
            .filter(active_reminders::dose_date.eq(dose_date))
            .order((active_reminders::scheduled_hhmm.asc(), active_reminders::id.asc()))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_active).collect())
    }

    pub async fn list_active(&self) -> Result<Vec<ActiveReminder>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ActiveRow> = active_reminders::table
            .filter(active_reminders::status.eq(ReminderStatus::Active.as_str()))
            .order((
                active_reminders::dose_date.desc(),
                active_reminders::scheduled_hhmm.asc(),
            ))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_active).collect())
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<ActiveReminder>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ActiveRow> = active_reminders::table
            .order((
                active_reminders::dose_date.desc(),
                active_reminders::scheduled_hhmm.desc(),
            ))
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_active).collect())
    }

    pub async fn delete_event_reminders(&self, event_id: i32) -> Result<usize> {
        let pattern = format!("{}%", cadence::event_key_prefix(event_id));
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            active_reminders::table.filter(active_reminders::reminder_key.like(pattern)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted)
    }

    pub async fn log_action(&self, reminder_key: &str, action: ReminderAction, ts: i64) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(reminder_log::table)
            .values(&NewLog {
                reminder_key,
                action: action.as_str(),
                ts,
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn recent_log(&self, limit: i64) -> Result<Vec<ReminderLogEntry>> {
        let mut conn = self.conn().await?;
        let rows: Vec<LogRow> = reminder_log::table
            .order(reminder_log::id.desc())
            .limit(limit)
            .load(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ReminderLogEntry {
                id: row.id,
                reminder_key: row.reminder_key,
                action: row.action,
                ts: row.ts,
            })
            .collect())
    }

    async fn transition(
        &self,
        id: i32,
        status: ReminderStatus,
        action: ReminderAction,
        now: i64,
    ) -> Result<bool> {
        let Some(reminder) = self.get(id).await? else {
            return Ok(false);
        };
        let updated = {
            let mut conn = self.conn().await?;
            diesel::update(
                active_reminders::table
                    .filter(active_reminders::id.eq(id))
                    .filter(active_reminders::status.eq(ReminderStatus::Active.as_str())),
            )
            .set(active_reminders::status.eq(status.as_str()))
            .execute(&mut conn)
            .await?
        };
        if updated > 0 {
            self.log_action(&reminder.reminder_key, action, now).await?;
            tracing::debug!(reminder_id = id, status = status.as_str(), "Reminder transitioned");
        }
        Ok(updated > 0)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        crate::db::conn(&self.pool).await
    }
}

fn map_active(row: ActiveRow) -> ActiveReminder {
    ActiveReminder {
        id: row.id,
        reminder_key: row.reminder_key,
        label: row.label,
        speak_text: row.speak_text,
        dose_date: row.dose_date,
        scheduled_hhmm: row.scheduled_hhmm,
        status: ReminderStatus::parse(&row.status),
        next_fire_at: row.next_fire_at,
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, date: &str, next: i64) -> ArmRequest {
        ArmRequest {
            reminder_key: key.to_string(),
            label: "Morning meds".to_string(),
            speak_text: "Time for morning meds.".to_string(),
            dose_date: date.to_string(),
            scheduled_hhmm: "08:30".to_string(),
            next_fire_at: next,
        }
    }

    #[tokio::test]
    async fn arming_is_idempotent_per_key_and_date() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("reminders.db");
        let store = ReminderStore::new(db_path.to_string_lossy()).await.expect("store");

        let (first, created) = store
            .create_active_for_date(&request("morning_meds", "2024-06-01", 100), 1)
            .await
            .unwrap();
        assert!(created);
        let (second, created) = store
            .create_active_for_date(&request("morning_meds", "2024-06-01", 999), 2)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.next_fire_at, 100);
        assert_eq!(store.list_for_date("2024-06-01").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transitions_are_guarded_by_active_status() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("reminders.db");
        let store = ReminderStore::new(db_path.to_string_lossy()).await.expect("store");

        let (row, _) = store
            .create_active_for_date(&request("adhoc:1", "2024-06-01", 100), 1)
            .await
            .unwrap();
        assert!(store.advance_next_fire(row.id, 100, 400).await.unwrap());
        assert!(!store.advance_next_fire(row.id, 100, 700).await.unwrap());

        assert!(store.mark_done(row.id, 500).await.unwrap());
        assert!(!store.mark_missed(row.id, 600).await.unwrap());
        assert!(store.snooze(row.id, 10, 700).await.unwrap().is_none());

        let log = store.recent_log(10).await.unwrap();
        let actions: Vec<&str> = log.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["done"]);
    }

    #[tokio::test]
    async fn seeds_default_schedules_once() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("reminders.db");
        let store = ReminderStore::new(db_path.to_string_lossy()).await.expect("store");

        assert_eq!(store.seed_defaults_if_empty().await.unwrap(), DEFAULT_SCHEDULES.len());
        assert_eq!(store.seed_defaults_if_empty().await.unwrap(), 0);
        let off = store.schedules_for_day_type(DayType::Off).await.unwrap();
        let keys: Vec<&str> = off.iter().map(|s| s.reminder_key.as_str()).collect();
        assert_eq!(keys, vec!["morning_meds", "lunch_meds", "evening_meds"]);
    }
}
