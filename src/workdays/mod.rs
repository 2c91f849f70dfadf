use chrono::{Datelike, NaiveDate, Weekday};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::clock::{format_date, normalize_hhmm, parse_iso_date};
use crate::db::{SqlitePool, SqlitePooledConn};
use crate::error::{KitchenPaError, Result};

mod schema;
use schema::work_days;

pub const DEFAULT_WORK_START: &str = "08:00";
pub const DEFAULT_WORK_END: &str = "16:30";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Workday {
    pub date: String,
    pub is_work: bool,
    pub start_hhmm: Option<String>,
    pub end_hhmm: Option<String>,
    /// False when the answer comes from the weekly pattern rather than a stored row.
    pub explicit: bool,
}

/// Weekly fallback: Monday to Wednesday are work days.
pub fn default_is_work(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Mon | Weekday::Tue | Weekday::Wed)
}

fn resolve_hours(
    is_work: bool,
    start: Option<String>,
    end: Option<String>,
) -> (Option<String>, Option<String>) {
    if !is_work {
        return (None, None);
    }
    (
        Some(start.unwrap_or_else(|| DEFAULT_WORK_START.to_string())),
        Some(end.unwrap_or_else(|| DEFAULT_WORK_END.to_string())),
    )
}

#[derive(Queryable)]
struct WorkdayRow {
    date: String,
    is_work: bool,
    start_hhmm: Option<String>,
    end_hhmm: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = work_days)]
struct NewWorkday<'a> {
    date: &'a str,
    is_work: bool,
    start_hhmm: Option<&'a str>,
    end_hhmm: Option<&'a str>,
}

pub struct WorkdayStore {
    pool: SqlitePool,
}

impl WorkdayStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = crate::db::open_pool(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        date: &str,
        is_work: bool,
        start_hhmm: Option<&str>,
        end_hhmm: Option<&str>,
    ) -> Result<Workday> {
        let date = format_date(parse_iso_date(date)?);
        let start = normalize_optional(start_hhmm)?;
        let end = normalize_optional(end_hhmm)?;
        let (start, end) = if is_work { (start, end) } else { (None, None) };

        let mut conn = self.conn().await?;
        let new = NewWorkday {
            date: &date,
            is_work,
            start_hhmm: start.as_deref(),
            end_hhmm: end.as_deref(),
        };
        diesel::insert_into(work_days::table)
            .values(&new)
            .on_conflict(work_days::date)
            .do_update()
            .set((
                work_days::is_work.eq(excluded(work_days::is_work)),
                work_days::start_hhmm.eq(excluded(work_days::start_hhmm)),
                work_days::end_hhmm.eq(excluded(work_days::end_hhmm)),
            ))
            .execute(&mut conn)
            .await?;
        tracing::debug!(date = %date, is_work, "Upserted workday");

        let (start_hhmm, end_hhmm) = resolve_hours(is_work, start, end);
        Ok(Workday {
            date,
            is_work,
            start_hhmm,
            end_hhmm,
            explicit: true,
        })
    }

    pub async fn get(&self, date: &str) -> Result<Workday> {
        let parsed = parse_iso_date(date)?;
        let date = format_date(parsed);
        let mut conn = self.conn().await?;
        let row = work_days::table
            .filter(work_days::date.eq(&date))
            .first::<WorkdayRow>(&mut conn)
            .await
            .optional()?;

        Ok(match row {
            Some(row) => {
                let (start_hhmm, end_hhmm) =
                    resolve_hours(row.is_work, row.start_hhmm, row.end_hhmm);
                Workday {
                    date: row.date,
                    is_work: row.is_work,
                    start_hhmm,
                    end_hhmm,
                    explicit: true,
                }
            }
            None => {
                let is_work = default_is_work(parsed);
                let (start_hhmm, end_hhmm) = resolve_hours(is_work, None, None);
                Workday {
                    date,
                    is_work,
                    start_hhmm,
                    end_hhmm,
                    explicit: false,
                }
            }
        })
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        crate::db::conn(&self.pool).await
    }
}

fn normalize_optional(value: Option<&str>) -> Result<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => normalize_hhmm(raw)
            .map(Some)
            .ok_or_else(|| KitchenPaError::validation(format!("invalid time `{raw}`"))),
    }
}
