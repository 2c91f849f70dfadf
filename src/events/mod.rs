use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

use crate::clock::{format_date, normalize_hhmm, parse_iso_date};
use crate::db::{SqlitePool, SqlitePooledConn};
use crate::error::{KitchenPaError, Result};

mod schema;
use schema::events;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReminderPreset {
    #[default]
    None,
    Standard,
}

impl ReminderPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            ReminderPreset::None => "none",
            ReminderPreset::Standard => "standard",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("standard") {
            ReminderPreset::Standard
        } else {
            ReminderPreset::None
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Event {
    pub id: i32,
    pub title: String,
    pub event_date: String,
    pub start_hhmm: Option<String>,
    pub end_hhmm: Option<String>,
    pub all_day: bool,
    pub reminder_preset: ReminderPreset,
    pub created_at: i64,
}

/// Validated input for a single event row.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEventInput {
    pub title: String,
    pub event_date: String,
    #[serde(default)]
    pub start_hhmm: Option<String>,
    #[serde(default)]
    pub end_hhmm: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default)]
    pub reminder_preset: ReminderPreset,
}

impl NewEventInput {
    /// Normalises times and enforces the all-day / timed shape. Timed events need both
    /// ends; all-day events carry neither.
    pub fn validated(mut self) -> Result<Self> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(KitchenPaError::validation("event title is required"));
        }
        self.event_date = format_date(parse_iso_date(&self.event_date)?);
        if self.all_day {
            self.start_hhmm = None;
            self.end_hhmm = None;
            return Ok(self);
        }
        let start = self
            .start_hhmm
            .as_deref()
            .and_then(normalize_hhmm)
            .ok_or_else(|| KitchenPaError::validation("start time is required unless all_day"))?;
        let end = self
            .end_hhmm
            .as_deref()
            .and_then(normalize_hhmm)
            .ok_or_else(|| KitchenPaError::validation("end time is required unless all_day"))?;
        if end < start {
            return Err(KitchenPaError::validation("end time is before start time"));
        }
        self.start_hhmm = Some(start);
        self.end_hhmm = Some(end);
        Ok(self)
    }
}

#[derive(Queryable)]
struct EventRow {
    id: i32,
    title: String,
    event_date: String,
    start_hhmm: Option<String>,
    end_hhmm: Option<String>,
    all_day: bool,
    reminder_preset: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = events)]
struct NewEvent<'a> {
    title: &'a str,
    event_date: &'a str,
    start_hhmm: Option<&'a str>,
    end_hhmm: Option<&'a str>,
    all_day: bool,
    reminder_preset: &'a str,
    created_at: i64,
}

pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = crate::db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: NewEventInput, now: i64) -> Result<Event> {
        let input = input.validated()?;
        let mut conn = self.conn().await?;
        let new = NewEvent {
            title: &input.title,
            event_date: &input.event_date,
            start_hhmm: input.start_hhmm.as_deref(),
            end_hhmm: input.end_hhmm.as_deref(),
            all_day: input.all_day,
            reminder_preset: input.reminder_preset.as_str(),
            created_at: now,
        };
        diesel::insert_into(events::table)
            .values(&new)
            .execute(&mut conn)
            .await?;

        let row: EventRow = events::table
            .filter(events::title.eq(&input.title))
            .filter(events::event_date.eq(&input.event_date))
            .order(events::id.desc())
            .first(&mut conn)
            .await?;
        tracing::debug!(event_id = row.id, date = %row.event_date, "Created event");
        Ok(map_row(row))
    }

    pub async fn get(&self, id: i32) -> Result<Option<Event>> {
        let mut conn = self.conn().await?;
        let row = events::table
            .filter(events::id.eq(id))
            .first::<EventRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(map_row))
    }

    /// Events on `date`: all-day first, then by start time.
    pub async fn list_for_date(&self, date: &str) -> Result<Vec<Event>> {
        let mut conn = self.conn().await?;
        let rows: Vec<EventRow> = events::table
            .filter(events::event_date.eq(date))
            .order((
                events::all_day.desc(),
                events::start_hhmm.asc(),
                events::id.asc(),
            ))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    /// Events on or after `date`, soonest first.
    pub async fn list_from_date(&self, date: &str) -> Result<Vec<Event>> {
        let mut conn = self.conn().await?;
        let rows: Vec<EventRow> = events::table
            .filter(events::event_date.ge(date))
            .order((
                events::event_date.asc(),
                events::all_day.desc(),
                events::start_hhmm.asc(),
                events::id.asc(),
            ))
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(events::table.filter(events::id.eq(id)))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        crate::db::conn(&self.pool).await
    }
}

fn map_row(row: EventRow) -> Event {
    Event {
        id: row.id,
        title: row.title,
        event_date: row.event_date,
        start_hhmm: row.start_hhmm,
        end_hhmm: row.end_hhmm,
        all_day: row.all_day,
        reminder_preset: ReminderPreset::parse(&row.reminder_preset),
        created_at: row.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str, date: &str, start: Option<&str>, end: Option<&str>) -> NewEventInput {
        NewEventInput {
            title: title.to_string(),
            event_date: date.to_string(),
            start_hhmm: start.map(str::to_string),
            end_hhmm: end.map(str::to_string),
            all_day: false,
            reminder_preset: ReminderPreset::None,
        }
    }

    #[test]
    fn timed_events_need_both_times() {
        let err = input("Dentist", "2024-06-01", Some("10:00"), None)
            .validated()
            .unwrap_err();
        assert!(err.is_validation());

        let ok = input("Dentist", "2024-06-01", Some("10am"), Some("10:30"))
            .validated()
            .unwrap();
        assert_eq!(ok.start_hhmm.as_deref(), Some("10:00"));
    }

    #[test]
    fn all_day_events_drop_times() {
        let mut event = input("Holiday", "2024-06-01", Some("10:00"), None);
        event.all_day = true;
        let ok = event.validated().unwrap();
        assert!(ok.start_hhmm.is_none());
        assert!(ok.end_hhmm.is_none());
    }

    #[tokio::test]
    async fn lists_events_for_date_with_all_day_first() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("events.db");
        let store = EventStore::new(db_path.to_string_lossy()).await.expect("store");

        store
            .create(input("Swim", "2024-06-01", Some("15:00"), Some("16:00")), 1)
            .await
            .unwrap();
        store
            .create(input("Dentist", "2024-06-01", Some("09:00"), Some("09:30")), 2)
            .await
            .unwrap();
        let mut fete = input("Fete", "2024-06-01", None, None);
        fete.all_day = true;
        store.create(fete, 3).await.unwrap();
        store
            .create(input("Later", "2024-06-02", Some("08:00"), Some("09:00")), 4)
            .await
            .unwrap();

        let titles: Vec<String> = store
            .list_for_date("2024-06-01")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["Fete", "Dentist", "Swim"]);
        assert_eq!(store.list_from_date("2024-06-02").await.unwrap().len(), 1);
    }
}
