use std::ops::RangeInclusive;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

/// User-input errors from [`resolve`]. The `Display` text is shown verbatim to the admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    InvalidTimeFormat,
    InvalidDateFormat,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::InvalidTimeFormat => {
                write!(f, "Nieprawidłowy format czasu. Użyj HH:MM (np. 21:30).")
            }
            Self::InvalidDateFormat => write!(
                f,
                "Nieprawidłowy format daty. Użyj DD.MM.RRRR lub DD.MM (np. 27.09.2025)."
            ),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Turns an admin-entered `H:MM`/`HH:MM` and optional `DD.MM`/`DD.MM.YYYY` into an instant.
///
/// Both strings are interpreted in `offset`. Without a date the next occurrence of the time
/// of day is used: today, or tomorrow if that moment has already passed. A given date is
/// taken as-is, even when it lies in the past.
pub fn resolve(
    time: &str,
    date: Option<&str>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, ResolveError> {
    let time_of_day = parse_time(time)?;
    let now_local = now.with_timezone(&offset);
    let date = date.map(str::trim).filter(|date| !date.is_empty());

    let day = match date {
        Some(date) => parse_date(date, now_local.year())?,
        None => now_local.date_naive(),
    };

    let mut instant = offset
        .from_local_datetime(&day.and_time(time_of_day))
        .single()
        .ok_or(ResolveError::InvalidDateFormat)?
        .with_timezone(&Utc);

    if date.is_none() && instant < now {
        instant += Duration::days(1);
    }
    Ok(instant)
}

fn is_number(raw: &str, len: RangeInclusive<usize>) -> bool {
    len.contains(&raw.len()) && raw.bytes().all(|b| b.is_ascii_digit())
}

fn parse_time(raw: &str) -> Result<NaiveTime, ResolveError> {
    let (hour, minute) = raw
        .trim()
        .split_once(':')
        .ok_or(ResolveError::InvalidTimeFormat)?;
    if !is_number(hour, 1..=2) || !is_number(minute, 2..=2) {
        return Err(ResolveError::InvalidTimeFormat);
    }
    let hour = hour.parse().map_err(|_| ResolveError::InvalidTimeFormat)?;
    let minute = minute.parse().map_err(|_| ResolveError::InvalidTimeFormat)?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or(ResolveError::InvalidTimeFormat)
}

fn parse_date(raw: &str, current_year: i32) -> Result<NaiveDate, ResolveError> {
    let parts = raw.split('.').collect::<Vec<_>>();
    let (day, month, year) = match parts.as_slice() {
        [day, month] => (*day, *month, current_year),
        [day, month, year] if is_number(year, 4..=4) => (
            *day,
            *month,
            year.parse().map_err(|_| ResolveError::InvalidDateFormat)?,
        ),
        _ => return Err(ResolveError::InvalidDateFormat),
    };
    if !is_number(day, 1..=2) || !is_number(month, 1..=2) {
        return Err(ResolveError::InvalidDateFormat);
    }
    let day = day.parse().map_err(|_| ResolveError::InvalidDateFormat)?;
    let month = month.parse().map_err(|_| ResolveError::InvalidDateFormat)?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or(ResolveError::InvalidDateFormat)
}

/// Human-readable time left, e.g. `2 godz. 5 min`. Negative durations read as zero.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        secs % 86_400 / 3_600,
        secs % 3_600 / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days} dni {hours} godz. {minutes} min")
    } else if hours > 0 {
        format!("{hours} godz. {minutes} min")
    } else if minutes > 0 {
        format!("{minutes} min")
    } else {
        format!("{seconds} s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poland() -> FixedOffset {
        FixedOffset::east_opt(2 * 3600).unwrap()
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        poland()
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn later_today_stays_today() {
        let now = local(2025, 9, 27, 20, 0);
        let resolved = resolve("21:30", None, now, poland()).unwrap();
        assert_eq!(resolved, local(2025, 9, 27, 21, 30));
    }

    #[test]
    fn passed_time_rolls_over_exactly_one_day() {
        let now = local(2025, 9, 27, 22, 0);
        let resolved = resolve("21:30", None, now, poland()).unwrap();
        assert_eq!(resolved, local(2025, 9, 28, 21, 30));

        // one minute past is still exactly one day, never more
        let now = local(2025, 9, 27, 21, 31);
        let resolved = resolve("21:30", None, now, poland()).unwrap();
        assert_eq!(resolved - local(2025, 9, 27, 21, 30), Duration::days(1));
    }

    #[test]
    fn rollover_across_month_and_year_end() {
        let now = local(2025, 12, 31, 23, 50);
        let resolved = resolve("0:05", None, now, poland()).unwrap();
        assert_eq!(resolved, local(2026, 1, 1, 0, 5));
    }

    #[test]
    fn current_minute_does_not_roll_over() {
        let now = local(2025, 9, 27, 21, 30);
        assert_eq!(resolve("21:30", None, now, poland()).unwrap(), now);
    }

    #[test]
    fn single_digit_hour_and_whitespace() {
        let now = local(2025, 9, 27, 6, 0);
        assert_eq!(
            resolve(" 9:05 ", None, now, poland()).unwrap(),
            local(2025, 9, 27, 9, 5)
        );
    }

    #[test]
    fn explicit_dates() {
        let now = local(2025, 9, 27, 22, 0);
        assert_eq!(
            resolve("21:30", Some("01.10.2025"), now, poland()).unwrap(),
            local(2025, 10, 1, 21, 30)
        );
        assert_eq!(
            resolve("21:30", Some("1.10"), now, poland()).unwrap(),
            local(2025, 10, 1, 21, 30)
        );
        // a given date is never rolled forward
        assert_eq!(
            resolve("21:30", Some("27.09"), now, poland()).unwrap(),
            local(2025, 9, 27, 21, 30)
        );
    }

    #[test]
    fn empty_date_counts_as_none() {
        let now = local(2025, 9, 27, 22, 0);
        assert_eq!(
            resolve("21:30", Some(""), now, poland()).unwrap(),
            local(2025, 9, 28, 21, 30)
        );
    }

    #[test]
    fn malformed_times() {
        let now = local(2025, 9, 27, 12, 0);
        for input in ["abc", "25:99", "24:00", "12:60", "7:5", "123:00", "12-30", "", "12:30:00", "+1:30"] {
            assert_eq!(
                resolve(input, None, now, poland()),
                Err(ResolveError::InvalidTimeFormat),
                "{input:?}"
            );
        }
    }

    #[test]
    fn malformed_dates() {
        let now = local(2025, 9, 27, 12, 0);
        for input in ["27/09", "2025-09-27", "32.01", "29.02.2025", "27.13", "27.09.25", "jutro", "27.09.2025.1"] {
            assert_eq!(
                resolve("21:30", Some(input), now, poland()),
                Err(ResolveError::InvalidDateFormat),
                "{input:?}"
            );
        }
    }

    #[test]
    fn time_errors_win_over_date_errors() {
        let now = local(2025, 9, 27, 12, 0);
        assert_eq!(
            resolve("abc", Some("jutro"), now, poland()),
            Err(ResolveError::InvalidTimeFormat)
        );
    }

    #[test]
    fn remaining_strings() {
        assert_eq!(format_remaining(Duration::seconds(-5)), "0 s");
        assert_eq!(format_remaining(Duration::seconds(42)), "42 s");
        assert_eq!(format_remaining(Duration::seconds(61)), "1 min");
        assert_eq!(format_remaining(Duration::minutes(125)), "2 godz. 5 min");
        assert_eq!(
            format_remaining(Duration::days(1) + Duration::minutes(61)),
            "1 dni 1 godz. 1 min"
        );
    }
}
