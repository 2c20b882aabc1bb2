// Copyright (c) 2026 Isprava Engineering
//! Response-cache TTL classification by historical-date detection
//! (`spec.md` SS4.6 "Response caching").
//!
//! Scans a user message for date signals and classifies the whole message
//! as "historical" (24 h TTL) only when every detected signal lies
//! strictly before the start of the current month in IST (UTC+5:30).

use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub const HISTORICAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

const IST_OFFSET_SECONDS: i32 = 5 * 3600 + 30 * 60;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());

static MONTH_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:tember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{4})\b",
    )
    .unwrap()
});

static RELATIVE_PAST_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:last|previous)\s+(month|quarter|year)\b").unwrap());

static TODAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\btoday\b").unwrap());

fn month_index(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    let table: &[(&str, u32)] = &[
        ("jan", 1), ("feb", 2), ("mar", 3), ("apr", 4), ("may", 5), ("jun", 6),
        ("jul", 7), ("aug", 8), ("sep", 9), ("oct", 10), ("nov", 11), ("dec", 12),
    ];
    table.iter().find(|(prefix, _)| name.starts_with(prefix)).map(|(_, idx)| *idx)
}

fn start_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn ist_now(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(IST_OFFSET_SECONDS).expect("valid fixed offset");
    now.with_timezone(&offset)
}

/// Start-of-current-month in IST, as a naive calendar date for comparison
/// against detected signals (which are themselves calendar dates).
fn start_of_current_month_ist(now: DateTime<Utc>) -> NaiveDate {
    let ist = ist_now(now);
    start_of_month(ist.year(), ist.month()).expect("valid current month")
}

/// One detected date signal, normalized to a representative calendar date
/// (day-level for ISO dates, first-of-month for month-level signals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DateSignal(NaiveDate);

fn detect_signals(text: &str, now: DateTime<Utc>) -> Vec<DateSignal> {
    let mut signals = Vec::new();

    for cap in ISO_DATE.captures_iter(text) {
        let year: i32 = cap[1].parse().unwrap_or(0);
        let month: u32 = cap[2].parse().unwrap_or(0);
        let day: u32 = cap[3].parse().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            signals.push(DateSignal(date));
        }
    }

    for cap in MONTH_YEAR.captures_iter(text) {
        let year: i32 = cap[2].parse().unwrap_or(0);
        if let Some(month) = month_index(&cap[1]) {
            if let Some(date) = start_of_month(year, month) {
                signals.push(DateSignal(date));
            }
        }
    }

    let current_month_start = start_of_current_month_ist(now);
    for cap in RELATIVE_PAST_PERIOD.captures_iter(text) {
        let unit = cap[1].to_lowercase();
        let representative = match unit.as_str() {
            "month" => prior_month_start(current_month_start, 1),
            "quarter" => prior_month_start(current_month_start, 3),
            "year" => prior_month_start(current_month_start, 12),
            _ => current_month_start,
        };
        signals.push(DateSignal(representative));
    }

    if TODAY.is_match(text) {
        // "today" converts to start-of-current-month — never strictly
        // before, so its mere presence forces the 5 min TTL.
        signals.push(DateSignal(current_month_start));
    }

    signals
}

fn prior_month_start(from: NaiveDate, months_back: u32) -> NaiveDate {
    let total_months = from.year() as i64 * 12 + (from.month0() as i64) - months_back as i64;
    let year = (total_months.div_euclid(12)) as i32;
    let month = (total_months.rem_euclid(12)) as u32 + 1;
    start_of_month(year, month).unwrap_or(from)
}

/// Classify `user_message`'s response-cache TTL per `spec.md` SS4.6.
pub fn classify_ttl(user_message: &str, now: DateTime<Utc>) -> Duration {
    let signals = detect_signals(user_message, now);
    if signals.is_empty() {
        return DEFAULT_TTL;
    }

    let current_month_start = start_of_current_month_ist(now);
    let all_strictly_before = signals.iter().all(|s| s.0 < current_month_start);

    if all_strictly_before {
        HISTORICAL_TTL
    } else {
        DEFAULT_TTL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        // 2026-07-27T10:00:00Z -> IST 2026-07-27T15:30:00+05:30, current
        // month start = 2026-07-01.
        Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap()
    }

    #[test]
    fn no_date_signals_gets_default_ttl() {
        assert_eq!(classify_ttl("how many leads do we have", fixed_now()), DEFAULT_TTL);
    }

    #[test]
    fn relative_last_month_is_historical() {
        assert_eq!(classify_ttl("how many leads last month?", fixed_now()), HISTORICAL_TTL);
    }

    #[test]
    fn relative_last_quarter_is_historical() {
        assert_eq!(classify_ttl("sales for the previous quarter", fixed_now()), HISTORICAL_TTL);
    }

    #[test]
    fn iso_date_before_current_month_is_historical() {
        assert_eq!(classify_ttl("leads on 2026-06-15", fixed_now()), HISTORICAL_TTL);
    }

    #[test]
    fn iso_date_in_current_month_is_not_historical() {
        assert_eq!(classify_ttl("leads on 2026-07-15", fixed_now()), DEFAULT_TTL);
    }

    #[test]
    fn month_year_name_before_current_month_is_historical() {
        assert_eq!(classify_ttl("how did January 2026 look", fixed_now()), HISTORICAL_TTL);
    }

    #[test]
    fn today_keyword_forces_default_ttl_even_with_past_date() {
        assert_eq!(
            classify_ttl("compare June 2026 with today's numbers", fixed_now()),
            DEFAULT_TTL
        );
    }

    #[test]
    fn mixed_past_and_present_signals_is_not_historical() {
        assert_eq!(classify_ttl("leads in 2026-06-15 and 2026-07-20", fixed_now()), DEFAULT_TTL);
    }
}
