use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Days between 0001-01-01 and the unix epoch in the proleptic Gregorian
/// calendar. Timestamps are stored as fractional day-numbers where
/// 0001-01-01T00:00:00 == 1.0, so the whole history of a feed fits in a
/// single monotonic `f64` line.
const EPOCH_ORDINAL: f64 = 719_163.0;

const SECS_PER_DAY: f64 = 86_400.0;

/// Sentinel day-number greater than any real timestamp.
///
/// A fresh resampler aggregate carries this value so that "incoming bar is
/// older than the aggregate" comparisons hold vacuously until the first
/// update.
pub const MAXDATE: f64 = f64::INFINITY;

/// Encode a UTC datetime as a fractional day-number.
pub fn date2num(dt: DateTime<Utc>) -> f64 {
    let secs = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) * 1e-6;
    EPOCH_ORDINAL + secs / SECS_PER_DAY
}

/// Decode a fractional day-number back into a UTC datetime.
///
/// Sub-microsecond residue from the float encoding is rounded away, so
/// `num2date(date2num(dt)) == dt` for microsecond-resolution inputs.
pub fn num2date(num: f64) -> DateTime<Utc> {
    let secs = (num - EPOCH_ORDINAL) * SECS_PER_DAY;
    let micros = (secs * 1e6).round() as i64;
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Decode a day-number into the given timezone, used when a strategy asked
/// for localised datetimes via the engine `tz` option.
pub fn num2date_tz(num: f64, tz: Tz) -> DateTime<Tz> {
    tz.from_utc_datetime(&num2date(num).naive_utc())
}

/// Combine the date part of `num` with a session-end time-of-day, yielding
/// the day-number of the next session end at or after `num`.
pub fn next_session_end(num: f64, session_end: NaiveTime) -> f64 {
    let dt = num2date(num);
    let eos = NaiveDateTime::new(dt.date_naive(), session_end);
    let eos = if eos < dt.naive_utc() {
        eos + chrono::Duration::days(1)
    } else {
        eos
    };
    date2num(Utc.from_utc_datetime(&eos))
}

/// Default session end used when a feed does not declare one.
pub fn default_session_end() -> NaiveTime {
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).expect("valid hardcoded time")
}

/// ISO `year * 100 + week` key for week-boundary comparisons.
pub fn iso_yearweek(num: f64) -> i64 {
    let week = num2date(num).iso_week();
    i64::from(week.year()) * 100 + i64::from(week.week())
}

/// `year * 100 + month` key for month-boundary comparisons.
pub fn yearmonth(num: f64) -> i64 {
    let d = num2date(num);
    i64::from(d.year()) * 100 + i64::from(d.month())
}

pub fn year(num: f64) -> i64 {
    i64::from(num2date(num).year())
}

/// Construct a day-number from calendar parts, convenience for fixtures.
pub fn num_from_ymd_hms(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    min: u32,
    sec: u32,
) -> f64 {
    let date = NaiveDate::from_ymd_opt(year, month, day).expect("valid calendar date");
    let time = NaiveTime::from_hms_opt(hour, min, sec).expect("valid wall time");
    date2num(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

/// Replace the intraday part of `num` with the given wall-clock parts,
/// rolling over into following days when `hour` exceeds 23 (a right-edge
/// stamped at midnight belongs to the next day).
pub fn replace_time(num: f64, hour: i64, min: i64, sec: i64, micro: i64) -> f64 {
    let extradays = hour.div_euclid(24);
    let hour = hour.rem_euclid(24);

    let dt = num2date(num);
    let time = NaiveTime::from_hms_micro_opt(hour as u32, min as u32, sec as u32, micro as u32)
        .expect("intraday parts in range");
    let mut adjusted = NaiveDateTime::new(dt.date_naive(), time);
    if extradays > 0 {
        adjusted += chrono::Duration::days(extradays);
    }
    date2num(Utc.from_utc_datetime(&adjusted))
}

/// Wall-clock time-of-day of a day-number.
pub fn time_of(num: f64) -> NaiveTime {
    num2date(num).time()
}

/// Current wall clock as a day-number, the reference for live-feed idleness
/// checks.
pub fn now_num() -> f64 {
    date2num(Utc::now())
}

pub fn weekday_of(num: f64) -> chrono::Weekday {
    num2date(num).weekday()
}

pub fn monthday_of(num: f64) -> u32 {
    num2date(num).day()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_number_round_trips_to_microseconds() {
        let dt = Utc
            .with_ymd_and_hms(2024, 3, 15, 9, 30, 21)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(250_000))
            .unwrap();
        assert_eq!(num2date(date2num(dt)), dt);
    }

    #[test]
    fn epoch_is_anchored_at_year_one() {
        let unix_epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(date2num(unix_epoch), 719_163.0);
    }

    #[test]
    fn day_numbers_order_like_datetimes() {
        let a = num_from_ymd_hms(2024, 1, 2, 9, 30, 0);
        let b = num_from_ymd_hms(2024, 1, 2, 9, 31, 0);
        let c = num_from_ymd_hms(2024, 1, 3, 0, 0, 0);
        assert!(a < b && b < c);
    }

    #[test]
    fn session_end_rolls_to_next_day_when_passed() {
        let late = num_from_ymd_hms(2024, 1, 2, 18, 0, 0);
        let eos = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        let eos_num = next_session_end(late, eos);
        assert_eq!(num2date(eos_num).date_naive().day(), 3);
    }

    #[test]
    fn replace_time_rolls_over_midnight() {
        let num = num_from_ymd_hms(2024, 1, 2, 23, 55, 0);
        let rolled = replace_time(num, 24, 0, 0, 0);
        let dt = num2date(rolled);
        assert_eq!(dt.date_naive().day(), 3);
        assert_eq!(dt.time(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }
}
