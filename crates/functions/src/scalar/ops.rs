//! Arithmetic over the value model with the dialect's widening rules:
//! INT64 -> NUMERIC -> BIGNUMERIC -> FLOAT64, exact decimals, calendar
//! arithmetic against INTERVAL, and the Safe wrapper absorbing errors
//! into NULL.

use skiffql_common::{Error, Result};
use skiffql_core::datetime as dt;
use skiffql_core::{DecimalKind, IntervalValue, Value};

fn absorb(safe: bool, result: Result<Value>) -> Result<Value> {
    match result {
        Err(e) if safe && e.is_safe_absorbable() => Ok(Value::Null),
        other => other,
    }
}

fn is_decimal(v: &Value) -> bool {
    matches!(v, Value::Numeric(_) | Value::BigNumeric(_))
}

fn is_float(v: &Value) -> bool {
    matches!(v, Value::Float64(_))
}

fn is_numeric_operand(v: &Value) -> bool {
    matches!(
        v,
        Value::Int64(_) | Value::Float64(_) | Value::Numeric(_) | Value::BigNumeric(_)
    )
}

/// The widened decimal kind for a pair of decimal-or-int operands.
fn decimal_kind(a: &Value, b: &Value) -> DecimalKind {
    if matches!(a, Value::BigNumeric(_)) || matches!(b, Value::BigNumeric(_)) {
        DecimalKind::BigNumeric
    } else {
        DecimalKind::Numeric
    }
}

pub fn add(args: &[Value]) -> Result<Value> {
    let (a, sa) = args[0].unwrap_safe();
    let (b, sb) = args[1].unwrap_safe();
    absorb(sa || sb, add_inner(a, b))
}

fn add_inner(a: &Value, b: &Value) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x
            .checked_add(*y)
            .map(Value::Int64)
            .ok_or_else(|| Error::overflow(format!("ADD: {} + {}", x, y))),
        _ if (is_float(a) || is_float(b)) && is_numeric_operand(a) && is_numeric_operand(b) => {
            Ok(Value::float64(a.to_float64()? + b.to_float64()?))
        }
        _ if (is_decimal(a) || is_decimal(b))
            && is_numeric_operand(a)
            && is_numeric_operand(b) =>
        {
            let kind = decimal_kind(a, b);
            let sum = a.to_decimal(kind)?.add(&b.to_decimal(kind)?)?;
            Ok(decimal_value(kind, sum))
        }
        (Value::Interval(x), Value::Interval(y)) => Ok(Value::Interval(IntervalValue::new(
            x.months + y.months,
            x.days + y.days,
            x.nanos + y.nanos,
        ))),
        (Value::Interval(iv), other) => add_inner(other, &Value::Interval(*iv)),
        (Value::Date(d), Value::Interval(iv)) => Ok(Value::Date(dt::date_add(*d, iv)?)),
        (Value::DateTime(v), Value::Interval(iv)) => Ok(Value::DateTime(dt::datetime_add(*v, iv)?)),
        (Value::Timestamp(v), Value::Interval(iv)) => {
            Ok(Value::Timestamp(dt::timestamp_add(*v, iv)?))
        }
        (Value::Time(v), Value::Interval(iv)) => Ok(Value::Time(dt::time_add(*v, iv)?)),
        (Value::String(s), Value::Interval(iv)) => {
            // date-typed cells surface as text
            add_inner(&reparse_temporal(s), &Value::Interval(*iv))
        }
        _ => Err(Error::type_mismatch(
            a.data_type().to_string(),
            b.data_type().to_string(),
        )),
    }
}

/// Text cells holding date/time values come back as strings; pick the
/// richest temporal reading for calendar arithmetic.
pub fn reparse_temporal(s: &str) -> Value {
    if let Ok(d) = dt::parse_date(s) {
        return Value::Date(d);
    }
    if let Ok(ts) = dt::parse_timestamp(s) {
        if s.contains('+') || s.ends_with('Z') || s.ends_with("UTC") {
            return Value::Timestamp(ts);
        }
    }
    if let Ok(v) = dt::parse_datetime(s) {
        return Value::DateTime(v);
    }
    if let Ok(t) = dt::parse_time(s) {
        return Value::Time(t);
    }
    Value::String(s.to_string())
}

pub fn sub(args: &[Value]) -> Result<Value> {
    let (a, sa) = args[0].unwrap_safe();
    let (b, sb) = args[1].unwrap_safe();
    absorb(sa || sb, sub_inner(a, b))
}

fn sub_inner(a: &Value, b: &Value) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x
            .checked_sub(*y)
            .map(Value::Int64)
            .ok_or_else(|| Error::overflow(format!("SUB: {} - {}", x, y))),
        _ if (is_float(a) || is_float(b)) && is_numeric_operand(a) && is_numeric_operand(b) => {
            Ok(Value::float64(a.to_float64()? - b.to_float64()?))
        }
        _ if (is_decimal(a) || is_decimal(b))
            && is_numeric_operand(a)
            && is_numeric_operand(b) =>
        {
            let kind = decimal_kind(a, b);
            let diff = a.to_decimal(kind)?.sub(&b.to_decimal(kind)?)?;
            Ok(decimal_value(kind, diff))
        }
        (_, Value::Interval(iv)) => add_inner(a, &Value::Interval(iv.negate())),
        (Value::Date(x), Value::Date(y)) => {
            Ok(Value::Interval(IntervalValue::new(0, (*x - *y).num_days() as i32, 0)))
        }
        (Value::DateTime(x), Value::DateTime(y)) => Ok(Value::Interval(IntervalValue::new(
            0,
            0,
            (*x - *y).num_nanoseconds().unwrap_or(0),
        ))),
        (Value::Timestamp(x), Value::Timestamp(y)) => Ok(Value::Interval(IntervalValue::new(
            0,
            0,
            (*x - *y).num_nanoseconds().unwrap_or(0),
        ))),
        (Value::Interval(x), Value::Interval(y)) => Ok(Value::Interval(IntervalValue::new(
            x.months - y.months,
            x.days - y.days,
            x.nanos - y.nanos,
        ))),
        (Value::String(s), _) => sub_inner(&reparse_temporal(s), b),
        (_, Value::String(s)) => sub_inner(a, &reparse_temporal(s)),
        _ => Err(Error::type_mismatch(
            a.data_type().to_string(),
            b.data_type().to_string(),
        )),
    }
}

pub fn mul(args: &[Value]) -> Result<Value> {
    let (a, sa) = args[0].unwrap_safe();
    let (b, sb) = args[1].unwrap_safe();
    absorb(sa || sb, mul_inner(a, b))
}

fn mul_inner(a: &Value, b: &Value) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Int64(x), Value::Int64(y)) => x
            .checked_mul(*y)
            .map(Value::Int64)
            .ok_or_else(|| Error::overflow(format!("MUL: {} * {}", x, y))),
        _ if (is_float(a) || is_float(b)) && is_numeric_operand(a) && is_numeric_operand(b) => {
            Ok(Value::float64(a.to_float64()? * b.to_float64()?))
        }
        _ if (is_decimal(a) || is_decimal(b))
            && is_numeric_operand(a)
            && is_numeric_operand(b) =>
        {
            let kind = decimal_kind(a, b);
            let product = a.to_decimal(kind)?.mul(&b.to_decimal(kind)?)?;
            Ok(decimal_value(kind, product))
        }
        (Value::Interval(iv), Value::Int64(n)) | (Value::Int64(n), Value::Interval(iv)) => {
            Ok(Value::Interval(IntervalValue::new(
                iv.months * (*n as i32),
                iv.days * (*n as i32),
                iv.nanos * n,
            )))
        }
        _ => Err(Error::type_mismatch(
            a.data_type().to_string(),
            b.data_type().to_string(),
        )),
    }
}

/// The `/` operator: FLOAT64 for integer and float operands, exact
/// decimal division for NUMERIC/BIGNUMERIC. Zero divisors fail.
pub fn div(args: &[Value]) -> Result<Value> {
    let (a, sa) = args[0].unwrap_safe();
    let (b, sb) = args[1].unwrap_safe();
    absorb(sa || sb, div_inner(a, b, "DIV"))
}

pub fn div_inner(a: &Value, b: &Value, context: &str) -> Result<Value> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    if is_decimal(a) || is_decimal(b) {
        let kind = decimal_kind(a, b);
        let quotient = a.to_decimal(kind)?.div(&b.to_decimal(kind)?, context)?;
        return Ok(decimal_value(kind, quotient));
    }
    let x = a.to_float64()?;
    let y = b.to_float64()?;
    if y == 0.0 {
        return Err(Error::division_by_zero(context));
    }
    Ok(Value::float64(x / y))
}

pub fn neg(args: &[Value]) -> Result<Value> {
    let (a, safe) = args[0].unwrap_safe();
    absorb(safe, neg_inner(a))
}

fn neg_inner(a: &Value) -> Result<Value> {
    match a {
        Value::Null => Ok(Value::Null),
        Value::Int64(v) => v
            .checked_neg()
            .map(Value::Int64)
            .ok_or_else(|| Error::overflow(format!("NEG: -({})", v))),
        Value::Float64(f) => Ok(Value::float64(-f.into_inner())),
        Value::Numeric(d) => Ok(Value::Numeric(d.neg())),
        Value::BigNumeric(d) => Ok(Value::BigNumeric(d.neg())),
        Value::Interval(iv) => Ok(Value::Interval(iv.negate())),
        other => {
            let f = other
                .to_float64()
                .map_err(|_| Error::type_mismatch("numeric", other.data_type().to_string()))?;
            Ok(Value::float64(-f))
        }
    }
}

fn decimal_value(kind: DecimalKind, d: skiffql_core::FixedDecimal) -> Value {
    match kind {
        DecimalKind::Numeric => Value::Numeric(d),
        DecimalKind::BigNumeric => Value::BigNumeric(d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiffql_core::FixedDecimal;

    fn numeric(s: &str) -> Value {
        Value::Numeric(FixedDecimal::parse(DecimalKind::Numeric, s).unwrap())
    }

    #[test]
    fn int_overflow_fails_and_safe_absorbs() {
        let args = [Value::Int64(i64::MAX), Value::Int64(1)];
        assert!(matches!(add(&args), Err(Error::Overflow(_))));
        let safe_args = [Value::Int64(i64::MAX).into_safe(), Value::Int64(1)];
        assert_eq!(add(&safe_args).unwrap(), Value::Null);
    }

    #[test]
    fn widening_int_plus_numeric() {
        let out = add(&[Value::Int64(1), numeric("0.5")]).unwrap();
        assert_eq!(out, numeric("1.5"));
    }

    #[test]
    fn int_division_produces_float() {
        let out = div(&[Value::Int64(7), Value::Int64(2)]).unwrap();
        assert_eq!(out, Value::float64(3.5));
    }

    #[test]
    fn date_plus_interval() {
        let d = Value::Date(dt::parse_date("2024-01-31").unwrap());
        let iv = Value::Interval(IntervalValue::new(1, 0, 0));
        assert_eq!(
            add(&[d, iv]).unwrap(),
            Value::Date(dt::parse_date("2024-02-29").unwrap())
        );
    }

    #[test]
    fn null_propagates() {
        assert_eq!(add(&[Value::Null, Value::Int64(1)]).unwrap(), Value::Null);
        assert_eq!(mul(&[Value::Int64(1), Value::Null]).unwrap(), Value::Null);
    }
}
