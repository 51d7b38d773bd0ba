//! Civil date/time part math: ADD/SUB with month clamping, DIFF as
//! boundaries crossed, TRUNC zeroing finer parts, EXTRACT components.

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
    Utc, Weekday,
};
use skiffql_common::{Error, Result};

use crate::value::IntervalValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePart {
    Year,
    IsoYear,
    Quarter,
    Month,
    Week(Weekday),
    IsoWeek,
    Day,
    DayOfWeek,
    DayOfYear,
    Hour,
    Minute,
    Second,
    Millisecond,
    Microsecond,
    Date,
    Time,
}

impl DatePart {
    pub fn parse(input: &str) -> Result<DatePart> {
        let s = input.trim().to_ascii_uppercase();
        if let Some(rest) = s.strip_prefix("WEEK(") {
            let day = rest.trim_end_matches(')');
            let weekday = match day {
                "SUNDAY" => Weekday::Sun,
                "MONDAY" => Weekday::Mon,
                "TUESDAY" => Weekday::Tue,
                "WEDNESDAY" => Weekday::Wed,
                "THURSDAY" => Weekday::Thu,
                "FRIDAY" => Weekday::Fri,
                "SATURDAY" => Weekday::Sat,
                other => {
                    return Err(Error::invalid_argument(format!(
                        "WEEK: unknown weekday {}",
                        other
                    )));
                }
            };
            return Ok(DatePart::Week(weekday));
        }
        match s.as_str() {
            "YEAR" => Ok(DatePart::Year),
            "ISOYEAR" => Ok(DatePart::IsoYear),
            "QUARTER" => Ok(DatePart::Quarter),
            "MONTH" => Ok(DatePart::Month),
            "WEEK" => Ok(DatePart::Week(Weekday::Sun)),
            "ISOWEEK" => Ok(DatePart::IsoWeek),
            "DAY" => Ok(DatePart::Day),
            "DAYOFWEEK" => Ok(DatePart::DayOfWeek),
            "DAYOFYEAR" => Ok(DatePart::DayOfYear),
            "HOUR" => Ok(DatePart::Hour),
            "MINUTE" => Ok(DatePart::Minute),
            "SECOND" => Ok(DatePart::Second),
            "MILLISECOND" => Ok(DatePart::Millisecond),
            "MICROSECOND" => Ok(DatePart::Microsecond),
            "DATE" => Ok(DatePart::Date),
            "TIME" => Ok(DatePart::Time),
            other => Err(Error::invalid_argument(format!(
                "unknown date part {}",
                other
            ))),
        }
    }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| Error::type_coercion(format!("invalid DATE literal {:?}", s)))
}

pub fn parse_time(s: &str) -> Result<NaiveTime> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| Error::type_coercion(format!("invalid TIME literal {:?}", s)))
}

pub fn parse_datetime(s: &str) -> Result<NaiveDateTime> {
    let t = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
    {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d.and_hms_opt(0, 0, 0).expect("midnight"));
    }
    Err(Error::type_coercion(format!(
        "invalid DATETIME literal {:?}",
        s
    )))
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let t = s.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%dT%H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%.f%:z",
    ] {
        if let Ok(ts) = DateTime::parse_from_str(t, fmt) {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    if let Some(rest) = t.strip_suffix('Z') {
        if let Ok(dt) = parse_datetime(rest) {
            return Ok(dt.and_utc());
        }
    }
    if let Some(rest) = t.strip_suffix(" UTC") {
        if let Ok(dt) = parse_datetime(rest) {
            return Ok(dt.and_utc());
        }
    }
    // `2024-01-02 03:04:05 America/New_York`
    if let Some(space) = t.rfind(' ') {
        let (head, zone) = t.split_at(space);
        if let Ok(tz) = zone.trim().parse::<chrono_tz::Tz>() {
            let dt = parse_datetime(head)?;
            return tz
                .from_local_datetime(&dt)
                .earliest()
                .map(|z| z.with_timezone(&Utc))
                .ok_or_else(|| {
                    Error::type_coercion(format!("ambiguous local time {:?} in {}", head, zone))
                });
        }
    }
    parse_datetime(t).map(|dt| dt.and_utc())
}

pub fn timestamp_in_zone(ts: DateTime<Utc>, zone: &str) -> Result<NaiveDateTime> {
    let tz: chrono_tz::Tz = zone
        .parse()
        .map_err(|_| Error::invalid_argument(format!("unknown time zone {:?}", zone)))?;
    Ok(ts.with_timezone(&tz).naive_local())
}

fn add_months_clamped(date: NaiveDate, months: i32) -> Result<NaiveDate> {
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new((-months) as u32))
    };
    shifted.ok_or_else(|| Error::overflow("DATE out of range"))
}

pub fn date_add(date: NaiveDate, interval: &IntervalValue) -> Result<NaiveDate> {
    if interval.nanos != 0 {
        return Err(Error::invalid_argument(
            "DATE_ADD: part finer than DAY not allowed for DATE",
        ));
    }
    let with_months = add_months_clamped(date, interval.months)?;
    with_months
        .checked_add_signed(Duration::days(interval.days as i64))
        .ok_or_else(|| Error::overflow("DATE out of range"))
}

pub fn datetime_add(dt: NaiveDateTime, interval: &IntervalValue) -> Result<NaiveDateTime> {
    let date = add_months_clamped(dt.date(), interval.months)?;
    let shifted = NaiveDateTime::new(date, dt.time())
        + Duration::days(interval.days as i64)
        + Duration::nanoseconds(interval.nanos);
    Ok(shifted)
}

pub fn time_add(t: NaiveTime, interval: &IntervalValue) -> Result<NaiveTime> {
    if interval.months != 0 || interval.days != 0 {
        return Err(Error::invalid_argument(
            "TIME_ADD: only time parts allowed for TIME",
        ));
    }
    // wraps around midnight
    Ok(t + Duration::nanoseconds(interval.nanos))
}

pub fn timestamp_add(ts: DateTime<Utc>, interval: &IntervalValue) -> Result<DateTime<Utc>> {
    if interval.months != 0 {
        return Err(Error::invalid_argument(
            "TIMESTAMP_ADD: month parts not allowed for TIMESTAMP",
        ));
    }
    Ok(ts + Duration::days(interval.days as i64) + Duration::nanoseconds(interval.nanos))
}

/// Start of the week containing `date` for the given first weekday.
fn week_start(date: NaiveDate, first: Weekday) -> NaiveDate {
    let back = (7 + date.weekday().num_days_from_monday() as i64
        - first.num_days_from_monday() as i64)
        % 7;
    date - Duration::days(back)
}

pub fn date_trunc(date: NaiveDate, part: DatePart) -> Result<NaiveDate> {
    match part {
        DatePart::Year => Ok(NaiveDate::from_ymd_opt(date.year(), 1, 1).expect("jan 1")),
        DatePart::IsoYear => {
            let iso = date.iso_week();
            Ok(NaiveDate::from_isoywd_opt(iso.year(), 1, Weekday::Mon).expect("iso week 1"))
        }
        DatePart::Quarter => {
            let month = (date.month0() / 3) * 3 + 1;
            Ok(NaiveDate::from_ymd_opt(date.year(), month, 1).expect("quarter start"))
        }
        DatePart::Month => Ok(NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .expect("month start")),
        DatePart::Week(first) => Ok(week_start(date, first)),
        DatePart::IsoWeek => Ok(week_start(date, Weekday::Mon)),
        DatePart::Day => Ok(date),
        _ => Err(Error::invalid_argument(format!(
            "DATE_TRUNC: unsupported part {:?}",
            part
        ))),
    }
}

pub fn datetime_trunc(dt: NaiveDateTime, part: DatePart) -> Result<NaiveDateTime> {
    let zero = |h, m, s| {
        NaiveDateTime::new(
            dt.date(),
            NaiveTime::from_hms_opt(h, m, s).expect("valid time"),
        )
    };
    match part {
        DatePart::Hour => Ok(zero(dt.hour(), 0, 0)),
        DatePart::Minute => Ok(zero(dt.hour(), dt.minute(), 0)),
        DatePart::Second => Ok(zero(dt.hour(), dt.minute(), dt.second())),
        DatePart::Millisecond => Ok(NaiveDateTime::new(
            dt.date(),
            NaiveTime::from_hms_nano_opt(
                dt.hour(),
                dt.minute(),
                dt.second(),
                (dt.nanosecond() / 1_000_000) * 1_000_000,
            )
            .expect("valid time"),
        )),
        DatePart::Microsecond => Ok(dt),
        _ => Ok(date_trunc(dt.date(), part)?
            .and_hms_opt(0, 0, 0)
            .expect("midnight")),
    }
}

pub fn time_trunc(t: NaiveTime, part: DatePart) -> Result<NaiveTime> {
    let build = |h, m, s| NaiveTime::from_hms_opt(h, m, s).expect("valid time");
    match part {
        DatePart::Hour => Ok(build(t.hour(), 0, 0)),
        DatePart::Minute => Ok(build(t.hour(), t.minute(), 0)),
        DatePart::Second => Ok(build(t.hour(), t.minute(), t.second())),
        DatePart::Millisecond => {
            let nanos = (t.nanosecond() / 1_000_000) * 1_000_000;
            Ok(NaiveTime::from_hms_nano_opt(t.hour(), t.minute(), t.second(), nanos)
                .expect("valid time"))
        }
        DatePart::Microsecond => Ok(t),
        _ => Err(Error::invalid_argument(format!(
            "TIME_TRUNC: unsupported part {:?}",
            part
        ))),
    }
}

pub fn timestamp_trunc(ts: DateTime<Utc>, part: DatePart) -> Result<DateTime<Utc>> {
    Ok(datetime_trunc(ts.naive_utc(), part)?.and_utc())
}

fn quarter(date: NaiveDate) -> i64 {
    (date.month0() / 3) as i64 + 1
}

/// Whole calendar boundaries crossed between `b` and `a` (`a - b`).
pub fn date_diff(a: NaiveDate, b: NaiveDate, part: DatePart) -> Result<i64> {
    match part {
        DatePart::Year => Ok(a.year() as i64 - b.year() as i64),
        DatePart::IsoYear => Ok(a.iso_week().year() as i64 - b.iso_week().year() as i64),
        DatePart::Quarter => {
            Ok(a.year() as i64 * 4 + quarter(a) - (b.year() as i64 * 4 + quarter(b)))
        }
        DatePart::Month => {
            Ok(a.year() as i64 * 12 + a.month() as i64 - (b.year() as i64 * 12 + b.month() as i64))
        }
        DatePart::Week(first) => {
            let wa = week_start(a, first);
            let wb = week_start(b, first);
            Ok((wa - wb).num_days() / 7)
        }
        DatePart::IsoWeek => date_diff(a, b, DatePart::Week(Weekday::Mon)),
        DatePart::Day => Ok((a - b).num_days()),
        _ => Err(Error::invalid_argument(format!(
            "DATE_DIFF: unsupported part {:?}",
            part
        ))),
    }
}

pub fn datetime_diff(a: NaiveDateTime, b: NaiveDateTime, part: DatePart) -> Result<i64> {
    match part {
        DatePart::Hour | DatePart::Minute | DatePart::Second | DatePart::Millisecond
        | DatePart::Microsecond => timestamp_diff(a.and_utc(), b.and_utc(), part),
        _ => date_diff(a.date(), b.date(), part),
    }
}

pub fn time_diff(a: NaiveTime, b: NaiveTime, part: DatePart) -> Result<i64> {
    let micros = |t: NaiveTime| {
        t.num_seconds_from_midnight() as i64 * 1_000_000 + (t.nanosecond() / 1_000) as i64
    };
    let unit: i64 = match part {
        DatePart::Hour => 3_600_000_000,
        DatePart::Minute => 60_000_000,
        DatePart::Second => 1_000_000,
        DatePart::Millisecond => 1_000,
        DatePart::Microsecond => 1,
        _ => {
            return Err(Error::invalid_argument(format!(
                "TIME_DIFF: unsupported part {:?}",
                part
            )));
        }
    };
    Ok(micros(a).div_euclid(unit) - micros(b).div_euclid(unit))
}

pub fn timestamp_diff(a: DateTime<Utc>, b: DateTime<Utc>, part: DatePart) -> Result<i64> {
    let unit: i64 = match part {
        DatePart::Day => 86_400_000_000,
        DatePart::Hour => 3_600_000_000,
        DatePart::Minute => 60_000_000,
        DatePart::Second => 1_000_000,
        DatePart::Millisecond => 1_000,
        DatePart::Microsecond => 1,
        _ => {
            return Err(Error::invalid_argument(format!(
                "TIMESTAMP_DIFF: unsupported part {:?}",
                part
            )));
        }
    };
    Ok(a.timestamp_micros().div_euclid(unit) - b.timestamp_micros().div_euclid(unit))
}

/// Week of year where weeks begin on `first`; dates before the year's
/// first such weekday fall in week 0.
fn week_of_year(date: NaiveDate, first: Weekday) -> i64 {
    let jan1 = NaiveDate::from_ymd_opt(date.year(), 1, 1).expect("jan 1");
    let forward = (7 + first.num_days_from_monday() as i64
        - jan1.weekday().num_days_from_monday() as i64)
        % 7;
    let first_start = jan1 + Duration::days(forward);
    if date < first_start {
        0
    } else {
        (date - first_start).num_days() / 7 + 1
    }
}

pub fn extract_from_datetime(dt: NaiveDateTime, part: DatePart) -> Result<i64> {
    let date = dt.date();
    match part {
        DatePart::Year => Ok(date.year() as i64),
        DatePart::IsoYear => Ok(date.iso_week().year() as i64),
        DatePart::Quarter => Ok(quarter(date)),
        DatePart::Month => Ok(date.month() as i64),
        DatePart::Week(first) => Ok(week_of_year(date, first)),
        DatePart::IsoWeek => Ok(date.iso_week().week() as i64),
        DatePart::Day => Ok(date.day() as i64),
        DatePart::DayOfWeek => Ok(date.weekday().num_days_from_sunday() as i64 + 1),
        DatePart::DayOfYear => Ok(date.ordinal() as i64),
        DatePart::Hour => Ok(dt.hour() as i64),
        DatePart::Minute => Ok(dt.minute() as i64),
        DatePart::Second => Ok(dt.second() as i64),
        DatePart::Millisecond => Ok((dt.nanosecond() / 1_000_000) as i64),
        DatePart::Microsecond => Ok((dt.nanosecond() / 1_000) as i64),
        DatePart::Date | DatePart::Time => Err(Error::invalid_argument(
            "EXTRACT: DATE/TIME parts are handled by the caller",
        )),
    }
}

pub fn last_day(date: NaiveDate, part: DatePart) -> Result<NaiveDate> {
    let next_start = match part {
        DatePart::Month => add_months_clamped(date_trunc(date, DatePart::Month)?, 1)?,
        DatePart::Quarter => add_months_clamped(date_trunc(date, DatePart::Quarter)?, 3)?,
        DatePart::Year => add_months_clamped(date_trunc(date, DatePart::Year)?, 12)?,
        DatePart::Week(first) => week_start(date, first) + Duration::days(7),
        DatePart::IsoWeek => week_start(date, Weekday::Mon) + Duration::days(7),
        _ => {
            return Err(Error::invalid_argument(format!(
                "LAST_DAY: unsupported part {:?}",
                part
            )));
        }
    };
    Ok(next_start - Duration::days(1))
}

/// Maps the dialect's strftime-style elements onto chrono's. Most pass
/// through untouched.
pub fn strftime_format(fmt: &str) -> String {
    fmt.replace("%E6S", "%S%.6f")
        .replace("%E3S", "%S%.3f")
        .replace("%E*S", "%S%.f")
        .replace("%E4Y", "%Y")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn month_add_clamps_to_month_end() {
        let jan31 = d("2024-01-31");
        let plus_month = date_add(jan31, &IntervalValue::new(1, 0, 0)).unwrap();
        assert_eq!(plus_month, d("2024-02-29"));
    }

    #[test]
    fn diff_counts_boundaries_not_elapsed_time() {
        // One second apart but across a year boundary.
        let a = parse_datetime("2024-01-01 00:00:00").unwrap();
        let b = parse_datetime("2023-12-31 23:59:59").unwrap();
        assert_eq!(datetime_diff(a, b, DatePart::Year).unwrap(), 1);
        assert_eq!(datetime_diff(a, b, DatePart::Day).unwrap(), 1);
        assert_eq!(datetime_diff(a, b, DatePart::Second).unwrap(), 1);
    }

    #[test]
    fn trunc_zeroes_finer_parts() {
        let dt = parse_datetime("2024-03-15 13:45:59.123456").unwrap();
        assert_eq!(
            datetime_trunc(dt, DatePart::Hour).unwrap(),
            parse_datetime("2024-03-15 13:00:00").unwrap()
        );
        assert_eq!(
            date_trunc(dt.date(), DatePart::Quarter).unwrap(),
            d("2024-01-01")
        );
    }

    #[test]
    fn week_starts_on_requested_weekday() {
        // 2024-03-15 is a Friday.
        let fri = d("2024-03-15");
        assert_eq!(date_trunc(fri, DatePart::Week(Weekday::Sun)).unwrap(), d("2024-03-10"));
        assert_eq!(date_trunc(fri, DatePart::Week(Weekday::Mon)).unwrap(), d("2024-03-11"));
        assert_eq!(
            date_diff(d("2024-03-18"), fri, DatePart::Week(Weekday::Mon)).unwrap(),
            1
        );
    }

    #[test]
    fn extract_week_zero_before_first_weekday() {
        // 2023-01-01 is a Sunday, so WEEK(SUNDAY) of Jan 1 is 1 while
        // WEEK(MONDAY) is 0.
        assert_eq!(week_of_year(d("2023-01-01"), Weekday::Sun), 1);
        assert_eq!(week_of_year(d("2023-01-01"), Weekday::Mon), 0);
    }

    #[test]
    fn timestamp_parsing_accepts_offsets_and_zones() {
        let a = parse_timestamp("2024-01-02 03:04:05+00").unwrap();
        let b = parse_timestamp("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(a, b);
        let ny = parse_timestamp("2024-01-02 03:04:05 America/New_York").unwrap();
        assert_eq!(ny.naive_utc(), parse_datetime("2024-01-02 08:04:05").unwrap());
    }

    #[test]
    fn last_day_of_month_and_year() {
        assert_eq!(last_day(d("2024-02-10"), DatePart::Month).unwrap(), d("2024-02-29"));
        assert_eq!(last_day(d("2024-02-10"), DatePart::Year).unwrap(), d("2024-12-31"));
    }
}
