use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use skiffql_common::{Error, Result};
use skiffql_core::datetime as dt;
use skiffql_core::datetime::DatePart;
use skiffql_core::{IntervalValue, Value};

use super::{arg_error, int_arg, text_arg};
use super::ops::reparse_temporal;

fn part_arg(func: &str, args: &[Value], position: usize) -> Result<DatePart> {
    DatePart::parse(&text_arg(func, args, position)?).map_err(|e| arg_error(func, position + 1, e))
}

fn interval_arg(func: &str, args: &[Value], position: usize) -> Result<IntervalValue> {
    args[position]
        .to_interval()
        .map_err(|e| arg_error(func, position + 1, e))
}

/// DATE(year, month, day) | DATE(string) | DATE(datetime/timestamp[, tz]).
pub fn date(args: &[Value]) -> Result<Value> {
    if args.len() == 3 {
        let y = int_arg("DATE", args, 0)?;
        let m = int_arg("DATE", args, 1)?;
        let d = int_arg("DATE", args, 2)?;
        return NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
            .map(Value::Date)
            .ok_or_else(|| arg_error("DATE", 1, format!("invalid date {}-{}-{}", y, m, d)));
    }
    if args.len() == 2 {
        let ts = args[0].to_timestamp().map_err(|e| arg_error("DATE", 1, e))?;
        let zone = text_arg("DATE", args, 1)?;
        return Ok(Value::Date(dt::timestamp_in_zone(ts, &zone)?.date()));
    }
    Ok(Value::Date(args[0].to_date().map_err(|e| arg_error("DATE", 1, e))?))
}

pub fn datetime(args: &[Value]) -> Result<Value> {
    if args.len() == 6 {
        let parts: Vec<i64> = (0..6)
            .map(|i| int_arg("DATETIME", args, i))
            .collect::<Result<_>>()?;
        let built = NaiveDate::from_ymd_opt(parts[0] as i32, parts[1] as u32, parts[2] as u32)
            .and_then(|d| d.and_hms_opt(parts[3] as u32, parts[4] as u32, parts[5] as u32))
            .ok_or_else(|| arg_error("DATETIME", 1, "invalid datetime components"))?;
        return Ok(Value::DateTime(built));
    }
    if args.len() == 2 {
        if let (Ok(d), Ok(t)) = (args[0].to_date(), args[1].to_time()) {
            return Ok(Value::DateTime(chrono::NaiveDateTime::new(d, t)));
        }
        let ts = args[0].to_timestamp().map_err(|e| arg_error("DATETIME", 1, e))?;
        let zone = text_arg("DATETIME", args, 1)?;
        return Ok(Value::DateTime(dt::timestamp_in_zone(ts, &zone)?));
    }
    Ok(Value::DateTime(
        args[0].to_datetime().map_err(|e| arg_error("DATETIME", 1, e))?,
    ))
}

pub fn time(args: &[Value]) -> Result<Value> {
    if args.len() == 3 {
        let h = int_arg("TIME", args, 0)?;
        let m = int_arg("TIME", args, 1)?;
        let s = int_arg("TIME", args, 2)?;
        return chrono::NaiveTime::from_hms_opt(h as u32, m as u32, s as u32)
            .map(Value::Time)
            .ok_or_else(|| arg_error("TIME", 1, format!("invalid time {}:{}:{}", h, m, s)));
    }
    Ok(Value::Time(args[0].to_time().map_err(|e| arg_error("TIME", 1, e))?))
}

/// TIMESTAMP(string[, tz]) | TIMESTAMP(date/datetime[, tz]).
pub fn timestamp(args: &[Value]) -> Result<Value> {
    let zone = if args.len() > 1 {
        Some(text_arg("TIMESTAMP", args, 1)?)
    } else {
        None
    };
    match &args[0] {
        Value::String(s) => match zone {
            Some(z) => {
                let tz: chrono_tz::Tz = z
                    .parse()
                    .map_err(|_| arg_error("TIMESTAMP", 2, format!("unknown time zone {:?}", z)))?;
                let naive = dt::parse_datetime(s)?;
                tz.from_local_datetime(&naive)
                    .earliest()
                    .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
                    .ok_or_else(|| arg_error("TIMESTAMP", 1, "ambiguous local time"))
            }
            None => Ok(Value::Timestamp(dt::parse_timestamp(s)?)),
        },
        other => Ok(Value::Timestamp(
            other.to_timestamp().map_err(|e| arg_error("TIMESTAMP", 1, e))?,
        )),
    }
}

macro_rules! temporal_shift {
    ($name:ident, $label:literal, $to:ident, $shift:path, $wrap:expr, $negate:expr) => {
        pub fn $name(args: &[Value]) -> Result<Value> {
            let base = match &args[0] {
                Value::String(s) => reparse_temporal(s),
                other => other.clone(),
            };
            let value = base.$to().map_err(|e| arg_error($label, 1, e))?;
            let mut interval = interval_arg($label, args, 1)?;
            if $negate {
                interval = interval.negate();
            }
            Ok($wrap($shift(value, &interval)?))
        }
    };
}

temporal_shift!(date_add, "DATE_ADD", to_date, dt::date_add, Value::Date, false);
temporal_shift!(date_sub, "DATE_SUB", to_date, dt::date_add, Value::Date, true);
temporal_shift!(datetime_add, "DATETIME_ADD", to_datetime, dt::datetime_add, Value::DateTime, false);
temporal_shift!(datetime_sub, "DATETIME_SUB", to_datetime, dt::datetime_add, Value::DateTime, true);
temporal_shift!(time_add, "TIME_ADD", to_time, dt::time_add, Value::Time, false);
temporal_shift!(time_sub, "TIME_SUB", to_time, dt::time_add, Value::Time, true);
temporal_shift!(timestamp_add, "TIMESTAMP_ADD", to_timestamp, dt::timestamp_add, Value::Timestamp, false);
temporal_shift!(timestamp_sub, "TIMESTAMP_SUB", to_timestamp, dt::timestamp_add, Value::Timestamp, true);

pub fn date_diff(args: &[Value]) -> Result<Value> {
    let a = args[0].to_date().map_err(|e| arg_error("DATE_DIFF", 1, e))?;
    let b = args[1].to_date().map_err(|e| arg_error("DATE_DIFF", 2, e))?;
    Ok(Value::Int64(dt::date_diff(a, b, part_arg("DATE_DIFF", args, 2)?)?))
}

pub fn datetime_diff(args: &[Value]) -> Result<Value> {
    let a = args[0].to_datetime().map_err(|e| arg_error("DATETIME_DIFF", 1, e))?;
    let b = args[1].to_datetime().map_err(|e| arg_error("DATETIME_DIFF", 2, e))?;
    Ok(Value::Int64(dt::datetime_diff(a, b, part_arg("DATETIME_DIFF", args, 2)?)?))
}

pub fn time_diff(args: &[Value]) -> Result<Value> {
    let a = args[0].to_time().map_err(|e| arg_error("TIME_DIFF", 1, e))?;
    let b = args[1].to_time().map_err(|e| arg_error("TIME_DIFF", 2, e))?;
    Ok(Value::Int64(dt::time_diff(a, b, part_arg("TIME_DIFF", args, 2)?)?))
}

pub fn timestamp_diff(args: &[Value]) -> Result<Value> {
    let a = args[0].to_timestamp().map_err(|e| arg_error("TIMESTAMP_DIFF", 1, e))?;
    let b = args[1].to_timestamp().map_err(|e| arg_error("TIMESTAMP_DIFF", 2, e))?;
    Ok(Value::Int64(dt::timestamp_diff(a, b, part_arg("TIMESTAMP_DIFF", args, 2)?)?))
}

pub fn date_trunc(args: &[Value]) -> Result<Value> {
    let d = args[0].to_date().map_err(|e| arg_error("DATE_TRUNC", 1, e))?;
    Ok(Value::Date(dt::date_trunc(d, part_arg("DATE_TRUNC", args, 1)?)?))
}

pub fn datetime_trunc(args: &[Value]) -> Result<Value> {
    let v = args[0].to_datetime().map_err(|e| arg_error("DATETIME_TRUNC", 1, e))?;
    Ok(Value::DateTime(dt::datetime_trunc(v, part_arg("DATETIME_TRUNC", args, 1)?)?))
}

pub fn time_trunc(args: &[Value]) -> Result<Value> {
    let t = args[0].to_time().map_err(|e| arg_error("TIME_TRUNC", 1, e))?;
    Ok(Value::Time(dt::time_trunc(t, part_arg("TIME_TRUNC", args, 1)?)?))
}

pub fn timestamp_trunc(args: &[Value]) -> Result<Value> {
    let ts = args[0].to_timestamp().map_err(|e| arg_error("TIMESTAMP_TRUNC", 1, e))?;
    Ok(Value::Timestamp(dt::timestamp_trunc(ts, part_arg("TIMESTAMP_TRUNC", args, 1)?)?))
}

/// EXTRACT(part FROM value[, AT TIME ZONE tz]); the rewriter passes the
/// part name as the second argument.
pub fn extract(args: &[Value]) -> Result<Value> {
    let part_text = text_arg("EXTRACT", args, 1)?;
    let source = match &args[0] {
        Value::String(s) => reparse_temporal(s),
        other => other.clone(),
    };
    let naive = match &source {
        Value::Timestamp(ts) => {
            if args.len() > 2 {
                let zone = text_arg("EXTRACT", args, 2)?;
                dt::timestamp_in_zone(*ts, &zone)?
            } else {
                ts.naive_utc()
            }
        }
        Value::Time(t) => chrono::NaiveDateTime::new(
            NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch"),
            *t,
        ),
        other => other.to_datetime().map_err(|e| arg_error("EXTRACT", 1, e))?,
    };
    match part_text.to_ascii_uppercase().as_str() {
        "DATE" => Ok(Value::Date(naive.date())),
        "TIME" => Ok(Value::Time(naive.time())),
        "DATETIME" => Ok(Value::DateTime(naive)),
        _ => Ok(Value::Int64(dt::extract_from_datetime(
            naive,
            part_arg("EXTRACT", args, 1)?,
        )?)),
    }
}

pub fn last_day(args: &[Value]) -> Result<Value> {
    let d = args[0].to_date().map_err(|e| arg_error("LAST_DAY", 1, e))?;
    let part = if args.len() > 1 {
        part_arg("LAST_DAY", args, 1)?
    } else {
        DatePart::Month
    };
    Ok(Value::Date(dt::last_day(d, part)?))
}

pub fn date_from_unix_date(args: &[Value]) -> Result<Value> {
    let days = int_arg("DATE_FROM_UNIX_DATE", args, 0)?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch");
    epoch
        .checked_add_signed(Duration::days(days))
        .map(Value::Date)
        .ok_or_else(|| Error::overflow(format!("DATE_FROM_UNIX_DATE: {}", days)))
}

pub fn unix_date(args: &[Value]) -> Result<Value> {
    let d = args[0].to_date().map_err(|e| arg_error("UNIX_DATE", 1, e))?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch");
    Ok(Value::Int64((d - epoch).num_days()))
}

pub fn timestamp_seconds(args: &[Value]) -> Result<Value> {
    let s = int_arg("TIMESTAMP_SECONDS", args, 0)?;
    DateTime::from_timestamp(s, 0)
        .map(Value::Timestamp)
        .ok_or_else(|| Error::overflow(format!("TIMESTAMP_SECONDS: {}", s)))
}

pub fn timestamp_millis(args: &[Value]) -> Result<Value> {
    let ms = int_arg("TIMESTAMP_MILLIS", args, 0)?;
    DateTime::from_timestamp_millis(ms)
        .map(Value::Timestamp)
        .ok_or_else(|| Error::overflow(format!("TIMESTAMP_MILLIS: {}", ms)))
}

pub fn timestamp_micros(args: &[Value]) -> Result<Value> {
    let us = int_arg("TIMESTAMP_MICROS", args, 0)?;
    DateTime::from_timestamp_micros(us)
        .map(Value::Timestamp)
        .ok_or_else(|| Error::overflow(format!("TIMESTAMP_MICROS: {}", us)))
}

pub fn unix_seconds(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(args[0].to_timestamp().map_err(|e| arg_error("UNIX_SECONDS", 1, e))?.timestamp()))
}

pub fn unix_millis(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(
        args[0].to_timestamp().map_err(|e| arg_error("UNIX_MILLIS", 1, e))?.timestamp_millis(),
    ))
}

pub fn unix_micros(args: &[Value]) -> Result<Value> {
    Ok(Value::Int64(
        args[0].to_timestamp().map_err(|e| arg_error("UNIX_MICROS", 1, e))?.timestamp_micros(),
    ))
}

macro_rules! format_temporal {
    ($name:ident, $label:literal, $to:ident) => {
        pub fn $name(args: &[Value]) -> Result<Value> {
            let fmt = dt::strftime_format(&text_arg($label, args, 0)?);
            let value = args[1].$to().map_err(|e| arg_error($label, 2, e))?;
            Ok(Value::String(value.format(&fmt).to_string()))
        }
    };
}

format_temporal!(format_date, "FORMAT_DATE", to_date);
format_temporal!(format_datetime, "FORMAT_DATETIME", to_datetime);
format_temporal!(format_time, "FORMAT_TIME", to_time);

pub fn format_timestamp(args: &[Value]) -> Result<Value> {
    let fmt = dt::strftime_format(&text_arg("FORMAT_TIMESTAMP", args, 0)?);
    let ts = args[1].to_timestamp().map_err(|e| arg_error("FORMAT_TIMESTAMP", 2, e))?;
    let local = if args.len() > 2 {
        dt::timestamp_in_zone(ts, &text_arg("FORMAT_TIMESTAMP", args, 2)?)?
    } else {
        ts.naive_utc()
    };
    Ok(Value::String(local.format(&fmt).to_string()))
}

pub fn parse_date(args: &[Value]) -> Result<Value> {
    let fmt = dt::strftime_format(&text_arg("PARSE_DATE", args, 0)?);
    let s = text_arg("PARSE_DATE", args, 1)?;
    NaiveDate::parse_from_str(&s, &fmt)
        .map(Value::Date)
        .map_err(|e| arg_error("PARSE_DATE", 2, e))
}

pub fn parse_datetime(args: &[Value]) -> Result<Value> {
    let fmt = dt::strftime_format(&text_arg("PARSE_DATETIME", args, 0)?);
    let s = text_arg("PARSE_DATETIME", args, 1)?;
    chrono::NaiveDateTime::parse_from_str(&s, &fmt)
        .map(Value::DateTime)
        .map_err(|e| arg_error("PARSE_DATETIME", 2, e))
}

pub fn parse_time(args: &[Value]) -> Result<Value> {
    let fmt = dt::strftime_format(&text_arg("PARSE_TIME", args, 0)?);
    let s = text_arg("PARSE_TIME", args, 1)?;
    chrono::NaiveTime::parse_from_str(&s, &fmt)
        .map(Value::Time)
        .map_err(|e| arg_error("PARSE_TIME", 2, e))
}

pub fn parse_timestamp(args: &[Value]) -> Result<Value> {
    let fmt = dt::strftime_format(&text_arg("PARSE_TIMESTAMP", args, 0)?);
    let s = text_arg("PARSE_TIMESTAMP", args, 1)?;
    if let Ok(ts) = DateTime::parse_from_str(&s, &fmt) {
        return Ok(Value::Timestamp(ts.with_timezone(&Utc)));
    }
    chrono::NaiveDateTime::parse_from_str(&s, &fmt)
        .map(|dt| Value::Timestamp(dt.and_utc()))
        .map_err(|e| arg_error("PARSE_TIMESTAMP", 2, e))
}

/// Builds the INTERVAL literal value the rewriter binds for
/// `INTERVAL n part` expressions.
pub fn make_interval(args: &[Value]) -> Result<Value> {
    let count = int_arg("INTERVAL", args, 0)?;
    let part = text_arg("INTERVAL", args, 1)?;
    Ok(Value::Interval(IntervalValue::from_part(count, &part)?))
}

/// The current-time family; `now` is the session clock (pinned by
/// WithCurrentTime or the wall clock).
pub fn current_date(now: DateTime<Utc>, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(z) if !z.is_null() => Ok(Value::Date(dt::timestamp_in_zone(now, &z.to_text()?)?.date())),
        _ => Ok(Value::Date(now.date_naive())),
    }
}

pub fn current_datetime(now: DateTime<Utc>, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(z) if !z.is_null() => Ok(Value::DateTime(dt::timestamp_in_zone(now, &z.to_text()?)?)),
        _ => Ok(Value::DateTime(now.naive_utc())),
    }
}

pub fn current_time(now: DateTime<Utc>, args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(z) if !z.is_null() => Ok(Value::Time(dt::timestamp_in_zone(now, &z.to_text()?)?.time())),
        _ => Ok(Value::Time(now.time())),
    }
}

pub fn current_timestamp(now: DateTime<Utc>, _args: &[Value]) -> Result<Value> {
    Ok(Value::Timestamp(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_add_with_interval_value() {
        let out = date_add(&[
            Value::from("2024-01-31"),
            Value::Interval(IntervalValue::new(0, 1, 0)),
        ])
        .unwrap();
        assert_eq!(out, Value::Date(dt::parse_date("2024-02-01").unwrap()));
    }

    #[test]
    fn extract_parts_and_week_start() {
        // 2024-03-15 is a Friday
        let d = Value::from("2024-03-15 10:30:00");
        assert_eq!(extract(&[d.clone(), Value::from("YEAR")]).unwrap(), Value::Int64(2024));
        assert_eq!(extract(&[d.clone(), Value::from("DAYOFWEEK")]).unwrap(), Value::Int64(6));
        assert_eq!(extract(&[d.clone(), Value::from("HOUR")]).unwrap(), Value::Int64(10));
        assert_eq!(
            extract(&[d, Value::from("DATE")]).unwrap(),
            Value::Date(dt::parse_date("2024-03-15").unwrap())
        );
    }

    #[test]
    fn format_and_parse_round_trip() {
        let formatted = format_date(&[Value::from("%Y/%m/%d"), Value::from("2024-02-29")]).unwrap();
        assert_eq!(formatted, Value::from("2024/02/29"));
        let parsed = parse_date(&[Value::from("%Y/%m/%d"), Value::from("2024/02/29")]).unwrap();
        assert_eq!(parsed, Value::Date(dt::parse_date("2024-02-29").unwrap()));
    }

    #[test]
    fn timestamp_conversions() {
        let ts = timestamp_micros(&[Value::Int64(1_700_000_000_000_000)]).unwrap();
        assert_eq!(unix_micros(&[ts]).unwrap(), Value::Int64(1_700_000_000_000_000));
    }
}
