/// session.rs — US-Eastern trading sessions
///
/// All session boundaries are defined in Eastern wall-clock minutes:
///
///   core session (RTH):      09:30 – 16:00  (minute 570 ..  960)
///   extended session (AH):   16:00 – 20:00  (minute 960 .. 1200)
///
/// Baseline bucketing discards bars outside both windows.  Execution uses a
/// two-way split: any minute outside the core window trades as the extended
/// session (extended-hours limit orders).
///
/// Eastern time is derived from UTC with an explicit DST rule (UTC−4 from the
/// second Sunday of March through the first Sunday of November, UTC−5
/// otherwise).  The switch happens at 02:00 local on a Sunday, outside every
/// trading window, so resolving the offset at date granularity is sufficient.
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const CORE_START_MIN: u32 = 9 * 60 + 30;
pub const CORE_END_MIN: u32 = 16 * 60;
pub const EXTENDED_END_MIN: u32 = 20 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Session {
    /// Regular trading hours, 09:30–16:00 ET.
    Core,
    /// After-hours, 16:00–20:00 ET (for execution: everything outside core).
    Extended,
}

impl Session {
    pub fn as_str(&self) -> &'static str {
        match self {
            Session::Core => "RTH",
            Session::Extended => "AH",
        }
    }

    pub fn is_core(&self) -> bool {
        matches!(self, Session::Core)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Session {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RTH" => Ok(Session::Core),
            "AH" => Ok(Session::Extended),
            _ => Err(format!("invalid session: {s}")),
        }
    }
}

/// n-th given weekday of a month (n = 1 → first).
fn nth_weekday(year: i32, month: u32, weekday: Weekday, n: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let shift = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
    first + chrono::Duration::days((shift + (n - 1) * 7) as i64)
}

/// UTC offset for US Eastern on the given local calendar date.
pub fn eastern_offset(date: NaiveDate) -> FixedOffset {
    let dst_start = nth_weekday(date.year(), 3, Weekday::Sun, 2);
    let dst_end = nth_weekday(date.year(), 11, Weekday::Sun, 1);
    let hours = if date >= dst_start && date < dst_end { -4 } else { -5 };
    FixedOffset::east_opt(hours * 3600).expect("valid offset")
}

/// Eastern wall-clock time for a UTC instant.
///
/// Two passes: the first guess uses the UTC date's offset, the second
/// corrects it when the instant falls on the other side of local midnight.
pub fn to_eastern(ts: DateTime<Utc>) -> DateTime<FixedOffset> {
    let guess = ts.with_timezone(&eastern_offset(ts.date_naive()));
    ts.with_timezone(&eastern_offset(guess.date_naive()))
}

/// Minutes since Eastern midnight for a UTC instant.
pub fn minute_of_day(ts: DateTime<Utc>) -> u32 {
    use chrono::Timelike;
    let et = to_eastern(ts);
    et.hour() * 60 + et.minute()
}

/// Session in effect at execution time.  Two-way split: outside the core
/// window everything is the extended session.
pub fn session_now(ts: DateTime<Utc>) -> Session {
    let m = minute_of_day(ts);
    if (CORE_START_MIN..CORE_END_MIN).contains(&m) {
        Session::Core
    } else {
        Session::Extended
    }
}

/// Session bucket for a minute bar, or None when the bar falls outside both
/// trading windows and must be discarded.
pub fn session_for_bar(ts_ms: i64) -> Option<Session> {
    let ts = DateTime::<Utc>::from_timestamp_millis(ts_ms)?;
    let m = minute_of_day(ts);
    if (CORE_START_MIN..CORE_END_MIN).contains(&m) {
        Some(Session::Core)
    } else if (CORE_END_MIN..EXTENDED_END_MIN).contains(&m) {
        Some(Session::Extended)
    } else {
        None
    }
}

/// Parse an "HH:MM" wall-clock string into minutes since midnight.
pub fn parse_minute(s: &str) -> Option<u32> {
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dst_boundaries_2025() {
        // 2025: DST starts Mar 9, ends Nov 2
        assert_eq!(nth_weekday(2025, 3, Weekday::Sun, 2), NaiveDate::from_ymd_opt(2025, 3, 9).unwrap());
        assert_eq!(nth_weekday(2025, 11, Weekday::Sun, 1), NaiveDate::from_ymd_opt(2025, 11, 2).unwrap());
        let summer = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let winter = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(eastern_offset(summer).local_minus_utc(), -4 * 3600);
        assert_eq!(eastern_offset(winter).local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn july_maps_through_minus_four() {
        // 2025-07-10 14:30 UTC = 10:30 ET
        let ts = Utc.with_ymd_and_hms(2025, 7, 10, 14, 30, 0).unwrap();
        assert_eq!(minute_of_day(ts), 10 * 60 + 30);
        assert_eq!(session_now(ts), Session::Core);
    }

    #[test]
    fn january_maps_through_minus_five() {
        // 2025-01-10 14:30 UTC = 09:30 ET, first core minute
        let ts = Utc.with_ymd_and_hms(2025, 1, 10, 14, 30, 0).unwrap();
        assert_eq!(minute_of_day(ts), CORE_START_MIN);
        assert_eq!(session_now(ts), Session::Core);
        // one minute earlier is outside the core window
        let ts = Utc.with_ymd_and_hms(2025, 1, 10, 14, 29, 0).unwrap();
        assert_eq!(session_now(ts), Session::Extended);
    }

    #[test]
    fn near_midnight_resolves_previous_eastern_day() {
        // 2025-01-11 02:00 UTC = 2025-01-10 21:00 ET
        let ts = Utc.with_ymd_and_hms(2025, 1, 11, 2, 0, 0).unwrap();
        let et = to_eastern(ts);
        assert_eq!(et.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());
    }

    #[test]
    fn bar_bucketing_boundaries() {
        // 2025-01-10: 14:30 UTC = 09:30 ET core start, 21:00 UTC = 16:00 ET,
        // 01:00 UTC next day = 20:00 ET end of extended
        let core_start = Utc.with_ymd_and_hms(2025, 1, 10, 14, 30, 0).unwrap();
        let core_end = Utc.with_ymd_and_hms(2025, 1, 10, 21, 0, 0).unwrap();
        let ext_last = Utc.with_ymd_and_hms(2025, 1, 11, 0, 59, 0).unwrap();
        let ext_end = Utc.with_ymd_and_hms(2025, 1, 11, 1, 0, 0).unwrap();

        assert_eq!(session_for_bar(core_start.timestamp_millis()), Some(Session::Core));
        assert_eq!(session_for_bar(core_end.timestamp_millis()), Some(Session::Extended));
        assert_eq!(session_for_bar(ext_last.timestamp_millis()), Some(Session::Extended));
        assert_eq!(session_for_bar(ext_end.timestamp_millis()), None);
        // pre-market is discarded
        let premarket = Utc.with_ymd_and_hms(2025, 1, 10, 13, 0, 0).unwrap();
        assert_eq!(session_for_bar(premarket.timestamp_millis()), None);
    }

    #[test]
    fn parse_minute_window_settings() {
        assert_eq!(parse_minute("09:30"), Some(570));
        assert_eq!(parse_minute("20:00"), Some(1200));
        assert_eq!(parse_minute("24:00"), None);
        assert_eq!(parse_minute("junk"), None);
    }
}
