//! Relative time phrases that override extracted absolute values.

use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bin\s+(?P<n>\d+|an?|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fifteen|twenty|thirty|forty|forty-five|fifty)\s*(?P<unit>minutes?|mins?|hours?|hrs?)\b",
    )
    .unwrap()
});
static HALF_HOUR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bin\s+(?:half\s+an|a\s+half)\s+hour\b").unwrap());
static FOR_DAYS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bfor\s+(?P<n>\d+|a|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|fourteen)\s+days?\b",
    )
    .unwrap()
});

fn number_word(value: &str) -> Option<i64> {
    let lower = value.to_ascii_lowercase();
    if let Ok(n) = lower.parse::<i64>() {
        return Some(n);
    }
    let n = match lower.as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "fourteen" => 14,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "forty-five" => 45,
        "fifty" => 50,
        _ => return None,
    };
    Some(n)
}

/// "in 20 minutes", "in 2 hours", "in an hour", "in half an hour". Counts too large for a
/// `Duration` yield `None`.
pub fn relative_offset(text: &str) -> Option<Duration> {
    if HALF_HOUR_RE.is_match(text) {
        return Some(Duration::minutes(30));
    }
    let caps = RELATIVE_RE.captures(text)?;
    let n = number_word(caps.name("n")?.as_str())?;
    if n <= 0 {
        return None;
    }
    let unit = caps.name("unit")?.as_str().to_ascii_lowercase();
    if unit.starts_with('h') {
        Duration::try_hours(n)
    } else {
        Duration::try_minutes(n)
    }
}

/// Day count from "for N days".
pub fn duration_days(text: &str) -> Option<i64> {
    let caps = FOR_DAYS_RE.captures(text)?;
    number_word(caps.name("n")?.as_str()).filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_phrases() {
        assert_eq!(relative_offset("remind me in 20 minutes"), Some(Duration::minutes(20)));
        assert_eq!(relative_offset("in 2 hours please"), Some(Duration::hours(2)));
        assert_eq!(relative_offset("in an hour"), Some(Duration::hours(1)));
        assert_eq!(relative_offset("in half an hour"), Some(Duration::minutes(30)));
        assert_eq!(relative_offset("in ten mins"), Some(Duration::minutes(10)));
        assert_eq!(relative_offset("in the morning"), None);
        assert_eq!(relative_offset("in 0 minutes"), None);
    }

    #[test]
    fn oversized_counts_do_not_overflow() {
        assert_eq!(relative_offset("remind me in 9999999999999 hours"), None);
        assert_eq!(relative_offset("in 99999999999999999 minutes"), None);
        assert_eq!(duration_days("camping for 999999999999999 days"), Some(999_999_999_999_999));
    }

    #[test]
    fn for_n_days() {
        assert_eq!(duration_days("camping for 3 days"), Some(3));
        assert_eq!(duration_days("away for five days from friday"), Some(5));
        assert_eq!(duration_days("for a day"), Some(1));
        assert_eq!(duration_days("for days"), None);
    }
}
