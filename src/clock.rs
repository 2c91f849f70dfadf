//! Single source of "now" for every date computation in the crate.
//!
//! Instants are persisted as unix seconds; calendar dates and `HH:MM` wall times are always
//! interpreted in the configured zone, never the host's local zone.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{KitchenPaError, Result};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    fn timezone(&self) -> Tz {
        self.now().timezone()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn now_ts(&self) -> i64 {
        self.now().timestamp()
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        chrono::Utc::now().with_timezone(&self.tz)
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Tz>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Builds a clock at `date` `hh:mm` local time in `tz`.
    pub fn at(tz: Tz, date: &str, hhmm: &str) -> Result<Self> {
        let date = parse_iso_date(date)?;
        let ts = local_timestamp(date, hhmm, tz)?;
        let now = tz
            .timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| KitchenPaError::Runtime(format!("invalid instant {ts}")))?;
        Ok(Self::new(now))
    }

    pub fn set(&self, now: DateTime<Tz>) {
        match self.now.write() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

pub fn parse_iso_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        KitchenPaError::validation(format!("invalid date `{value}`; expected YYYY-MM-DD"))
    })
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

static HHMM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d{1,2})(?:[:.](\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)?\s*$").unwrap()
});

/// Normalises loose wall-clock input to `HH:MM` (24h). Accepts `9:05`, `09:05`, `10am`,
/// `10:30 pm`. A bare hour without am/pm is rejected.
pub fn normalize_hhmm(value: &str) -> Option<String> {
    let caps = HHMM_RE.captures(value)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let meridiem = caps.get(3).map(|m| m.as_str().to_ascii_lowercase());
    if caps.get(2).is_none() && meridiem.is_none() {
        return None;
    }
    match meridiem.as_deref() {
        Some(m) if m.starts_with('a') => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour == 12 {
                hour = 0;
            }
        }
        Some(_) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if hour != 12 {
                hour += 12;
            }
        }
        None => {}
    }
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{hour:02}:{minute:02}"))
}

pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    let normalized = normalize_hhmm(value).ok_or_else(|| {
        KitchenPaError::validation(format!("invalid time `{value}`; expected HH:MM"))
    })?;
    NaiveTime::parse_from_str(&normalized, "%H:%M")
        .map_err(|_| KitchenPaError::validation(format!("invalid time `{value}`")))
}

pub fn format_hhmm<T: Timelike>(time: &T) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

/// Unix seconds of `date` at `hhmm` wall time in `tz`. Ambiguous times take the earlier
/// instant; times inside a DST gap move forward to the first valid minute.
pub fn local_timestamp(date: NaiveDate, hhmm: &str, tz: Tz) -> Result<i64> {
    let time = parse_hhmm(hhmm)?;
    let mut naive = date.and_time(time);
    for _ in 0..=120 {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Ok(dt.timestamp()),
            LocalResult::Ambiguous(earliest, _) => return Ok(earliest.timestamp()),
            LocalResult::None => naive += Duration::minutes(1),
        }
    }
    Err(KitchenPaError::Runtime(format!(
        "no valid local instant for {date} {hhmm} in {tz}"
    )))
}

pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::London;

    #[test]
    fn normalizes_loose_times() {
        assert_eq!(normalize_hhmm("9:05").as_deref(), Some("09:05"));
        assert_eq!(normalize_hhmm("10am").as_deref(), Some("10:00"));
        assert_eq!(normalize_hhmm("10:30 pm").as_deref(), Some("22:30"));
        assert_eq!(normalize_hhmm("12am").as_deref(), Some("00:00"));
        assert_eq!(normalize_hhmm("12 pm").as_deref(), Some("12:00"));
        assert_eq!(normalize_hhmm("24:00"), None);
        assert_eq!(normalize_hhmm("10"), None);
        assert_eq!(normalize_hhmm("soon"), None);
    }

    #[test]
    fn local_timestamp_respects_bst() {
        let summer = parse_iso_date("2024-06-01").unwrap();
        let winter = parse_iso_date("2024-01-01").unwrap();
        let summer_ts = local_timestamp(summer, "09:00", London).unwrap();
        let winter_ts = local_timestamp(winter, "09:00", London).unwrap();
        // 09:00 BST is 08:00 UTC, 09:00 GMT is 09:00 UTC.
        assert_eq!(summer_ts % 86_400, 8 * 3600);
        assert_eq!(winter_ts % 86_400, 9 * 3600);
    }

    #[test]
    fn local_timestamp_skips_spring_forward_gap() {
        let date = parse_iso_date("2024-03-31").unwrap();
        let gap = local_timestamp(date, "01:30", London).unwrap();
        let after = local_timestamp(date, "02:00", London).unwrap();
        assert_eq!(gap, after);
    }

    #[test]
    fn fixed_clock_reports_local_today() {
        let clock = FixedClock::at(London, "2024-06-01", "23:30").unwrap();
        assert_eq!(format_date(clock.today()), "2024-06-01");
        clock.advance(Duration::minutes(45));
        assert_eq!(format_date(clock.today()), "2024-06-02");
    }
}
