//! Exchange-local clock and session calendar.
//!
//! All trading decisions are made in IST; storage and event timestamps stay
//! in UTC. Every predicate here is a pure function of a supplied wall-clock
//! instant so the engine loop reads the clock once per cycle.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Kolkata;

/// NSE cash session open.
pub const SESSION_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 15, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// NSE cash session close.
pub const SESSION_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(15, 30, 0) {
    Some(t) => t,
    None => unreachable!(),
};

/// Convert a UTC instant to IST.
#[must_use]
pub fn to_ist(now_utc: DateTime<Utc>) -> DateTime<chrono_tz::Tz> {
    now_utc.with_timezone(&Kolkata)
}

/// The IST trading date for an instant. The risk book keys off this; it
/// rolls at 00:00 IST.
#[must_use]
pub fn ist_date(now_utc: DateTime<Utc>) -> NaiveDate {
    to_ist(now_utc).date_naive()
}

/// Whether the IST date falls on a weekday.
#[must_use]
pub fn is_weekday(now_utc: DateTime<Utc>) -> bool {
    !matches!(to_ist(now_utc).weekday(), Weekday::Sat | Weekday::Sun)
}

/// Within the exchange session ([09:15, 15:30] IST on weekdays).
#[must_use]
pub fn within_session(now_utc: DateTime<Utc>) -> bool {
    if !is_weekday(now_utc) {
        return false;
    }
    let t = to_ist(now_utc).time();
    (SESSION_OPEN..=SESSION_CLOSE).contains(&t)
}

/// Within the configured entry window [open, close] IST. Entry windows
/// never span midnight.
#[must_use]
pub fn within_entry_window(now_utc: DateTime<Utc>, open: NaiveTime, close: NaiveTime) -> bool {
    if !is_weekday(now_utc) {
        return false;
    }
    let t = to_ist(now_utc).time();
    (open..=close).contains(&t)
}

/// At or past an IST cutoff (e.g. the force-flat time).
#[must_use]
pub fn at_or_after(now_utc: DateTime<Utc>, cutoff: NaiveTime) -> bool {
    to_ist(now_utc).time() >= cutoff
}

/// Build a UTC instant from an IST date and time. Test and expiry helper.
///
/// # Panics
/// Panics if the local datetime is invalid (IST has no DST gaps).
#[must_use]
pub fn ist_datetime(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Kolkata
        .from_local_datetime(&date.and_time(time))
        .single()
        .expect("IST has no ambiguous local times")
        .with_timezone(&Utc)
}
