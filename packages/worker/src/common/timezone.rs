//! User-local calendar math.
//!
//! All "is it 9 AM for this user" and "within the last two local days"
//! decisions resolve the user's IANA timezone and map half-open local-day
//! intervals back to UTC at query time. Fixed offsets are never used.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Resolve an IANA timezone name. Empty or unparseable names fall back to UTC.
pub fn resolve(name: &str) -> Tz {
    if name.is_empty() {
        return Tz::UTC;
    }
    name.parse().unwrap_or_else(|_| {
        warn!(timezone = %name, "unknown timezone, falling back to UTC");
        Tz::UTC
    })
}

/// The user's current local calendar date.
pub fn local_today(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// The user's current local hour (0..=23).
pub fn local_hour(now: DateTime<Utc>, tz: Tz) -> u32 {
    use chrono::Timelike;
    now.with_timezone(&tz).hour()
}

/// UTC image of the half-open local interval [yesterday 00:00, tomorrow 00:00).
///
/// This is the "two-day window" used by the eligibility predicate: the local
/// calendar day plus the preceding day, ending at the user's upcoming local
/// midnight.
pub fn two_day_window_utc(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = local_today(now, tz);
    let start = local_midnight_utc(today - Days::new(1), tz);
    let end = local_midnight_utc(today + Days::new(1), tz);
    (start, end)
}

/// UTC image of the half-open local interval [today 00:00, tomorrow 00:00).
///
/// Used for once-per-local-day idempotency queries against the ledger.
pub fn local_day_window_utc(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = local_today(now, tz);
    let start = local_midnight_utc(today, tz);
    let end = local_midnight_utc(today + Days::new(1), tz);
    (start, end)
}

/// Map a local calendar date's midnight to UTC.
///
/// DST transitions at midnight are resolved to the earliest valid instant;
/// for zones where midnight does not exist on a transition day (e.g.
/// America/Santiago), the first existing hour is used.
fn local_midnight_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&date.and_time(NaiveTime::MIN)) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            for hour in 1..=3 {
                let shifted = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap());
                if let Some(dt) = tz.from_local_datetime(&shifted).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            // No valid instant in the first hours of the day; treat the
            // naive midnight as UTC rather than fail the query.
            Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn empty_and_invalid_names_fall_back_to_utc() {
        assert_eq!(resolve(""), Tz::UTC);
        assert_eq!(resolve("Not/AZone"), Tz::UTC);
        assert_eq!(resolve("America/New_York"), chrono_tz::America::New_York);
    }

    #[test]
    fn local_today_crosses_date_line_west() {
        // 01:00 UTC on the 15th is still the 14th in New York (UTC-5).
        let now = utc("2025-01-15T01:00:00Z");
        let tz = resolve("America/New_York");
        assert_eq!(
            local_today(now, tz),
            NaiveDate::from_ymd_opt(2025, 1, 14).unwrap()
        );
    }

    #[test]
    fn local_hour_differs_per_zone() {
        let now = utc("2025-01-15T09:00:00Z");
        assert_eq!(local_hour(now, resolve("UTC")), 9);
        assert_eq!(local_hour(now, resolve("America/New_York")), 4);

        let later = utc("2025-01-15T14:00:00Z");
        assert_eq!(local_hour(later, resolve("America/New_York")), 9);
        assert_eq!(local_hour(later, resolve("UTC")), 14);
    }

    #[test]
    fn two_day_window_maps_local_midnights_to_utc() {
        // Local today for a New Yorker at 01:00Z on Jan 15 is Jan 14, so the
        // window is [Jan 13 00:00 EST, Jan 15 00:00 EST) = [05:00Z, 05:00Z).
        let now = utc("2025-01-15T01:00:00Z");
        let tz = resolve("America/New_York");
        let (start, end) = two_day_window_utc(now, tz);
        assert_eq!(start, utc("2025-01-13T05:00:00Z"));
        assert_eq!(end, utc("2025-01-15T05:00:00Z"));
    }

    #[test]
    fn two_day_window_utc_zone() {
        let now = utc("2025-06-10T12:30:00Z");
        let (start, end) = two_day_window_utc(now, Tz::UTC);
        assert_eq!(start, utc("2025-06-09T00:00:00Z"));
        assert_eq!(end, utc("2025-06-11T00:00:00Z"));
    }

    #[test]
    fn single_day_window() {
        let now = utc("2025-01-15T09:00:00Z");
        let tz = resolve("America/New_York");
        let (start, end) = local_day_window_utc(now, tz);
        assert_eq!(start, utc("2025-01-15T05:00:00Z"));
        assert_eq!(end, utc("2025-01-16T05:00:00Z"));
    }

    #[test]
    fn dst_spring_forward_window_still_half_open() {
        // US DST starts 2025-03-09; the local day is 23 hours long.
        let now = utc("2025-03-09T18:00:00Z");
        let tz = resolve("America/New_York");
        let (start, end) = local_day_window_utc(now, tz);
        assert_eq!(start, utc("2025-03-09T05:00:00Z"));
        assert_eq!(end, utc("2025-03-10T04:00:00Z"));
        assert!(start < end);
        assert_eq!(start.hour(), 5);
    }
}
