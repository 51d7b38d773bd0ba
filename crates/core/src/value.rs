use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use skiffql_common::{Error, Result};

use crate::numeric::{DecimalKind, FixedDecimal};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Unknown,
    Bool,
    Int64,
    Float64,
    Numeric,
    BigNumeric,
    String,
    Bytes,
    Date,
    DateTime,
    Time,
    Timestamp,
    Interval,
    Json,
    Struct(Vec<StructField>),
    Array(Box<DataType>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub data_type: DataType,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Unknown => write!(f, "UNKNOWN"),
            DataType::Bool => write!(f, "BOOL"),
            DataType::Int64 => write!(f, "INT64"),
            DataType::Float64 => write!(f, "FLOAT64"),
            DataType::Numeric => write!(f, "NUMERIC"),
            DataType::BigNumeric => write!(f, "BIGNUMERIC"),
            DataType::String => write!(f, "STRING"),
            DataType::Bytes => write!(f, "BYTES"),
            DataType::Date => write!(f, "DATE"),
            DataType::DateTime => write!(f, "DATETIME"),
            DataType::Time => write!(f, "TIME"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Interval => write!(f, "INTERVAL"),
            DataType::Json => write!(f, "JSON"),
            DataType::Struct(fields) => {
                write!(f, "STRUCT<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if field.name.is_empty() {
                        write!(f, "{}", field.data_type)?;
                    } else {
                        write!(f, "{} {}", field.name, field.data_type)?;
                    }
                }
                write!(f, ">")
            }
            DataType::Array(inner) => write!(f, "ARRAY<{}>", inner),
        }
    }
}

impl DataType {
    /// SQLite column affinity for the declared type; everything without
    /// a native counterpart stores as TEXT with the cell encoding.
    pub fn host_affinity(&self) -> &'static str {
        match self {
            DataType::Bool | DataType::Int64 => "INTEGER",
            DataType::Float64 => "REAL",
            DataType::Bytes => "BLOB",
            _ => "TEXT",
        }
    }

    /// Parses the canonical `Display` form back into a type. Used by the
    /// rewriter to thread CAST targets through the host store as plain
    /// strings.
    pub fn parse(input: &str) -> Result<DataType> {
        let s = input.trim();
        let upper = s.to_ascii_uppercase();
        let simple = match upper.as_str() {
            "BOOL" | "BOOLEAN" => Some(DataType::Bool),
            "INT64" | "INT" | "INTEGER" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" => {
                Some(DataType::Int64)
            }
            "FLOAT64" | "FLOAT" | "DOUBLE" => Some(DataType::Float64),
            "NUMERIC" | "DECIMAL" => Some(DataType::Numeric),
            "BIGNUMERIC" | "BIGDECIMAL" => Some(DataType::BigNumeric),
            "STRING" => Some(DataType::String),
            "BYTES" => Some(DataType::Bytes),
            "DATE" => Some(DataType::Date),
            "DATETIME" => Some(DataType::DateTime),
            "TIME" => Some(DataType::Time),
            "TIMESTAMP" => Some(DataType::Timestamp),
            "INTERVAL" => Some(DataType::Interval),
            "JSON" => Some(DataType::Json),
            "UNKNOWN" | "ANY TYPE" => Some(DataType::Unknown),
            _ => None,
        };
        if let Some(t) = simple {
            return Ok(t);
        }
        if upper.starts_with("ARRAY<") && s.ends_with('>') {
            let inner = &s["ARRAY<".len()..s.len() - 1];
            return Ok(DataType::Array(Box::new(DataType::parse(inner)?)));
        }
        if upper.starts_with("STRUCT<") && s.ends_with('>') {
            let inner = &s["STRUCT<".len()..s.len() - 1];
            let mut fields = Vec::new();
            for part in split_top_level(inner) {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                // `name TYPE` or bare `TYPE`; the type may itself
                // contain spaces only inside <...>.
                let split = part
                    .char_indices()
                    .find(|(i, c)| *c == ' ' && !part[..*i].contains('<'))
                    .map(|(i, _)| i);
                match split {
                    Some(i) => match DataType::parse(&part[i + 1..]) {
                        Ok(data_type) => fields.push(StructField {
                            name: part[..i].to_string(),
                            data_type,
                        }),
                        Err(_) => fields.push(StructField {
                            name: String::new(),
                            data_type: DataType::parse(part)?,
                        }),
                    },
                    None => fields.push(StructField {
                        name: String::new(),
                        data_type: DataType::parse(part)?,
                    }),
                }
            }
            return Ok(DataType::Struct(fields));
        }
        Err(Error::analyze(format!("unsupported type {:?}", input)))
    }
}

/// Splits on commas that are not nested inside `<...>`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// INTERVAL as a (months, days, nanoseconds) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalValue {
    pub months: i32,
    pub days: i32,
    pub nanos: i64,
}

impl IntervalValue {
    pub const NANOS_PER_MICRO: i64 = 1_000;
    pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
    pub const NANOS_PER_MINUTE: i64 = 60 * Self::NANOS_PER_SECOND;
    pub const NANOS_PER_HOUR: i64 = 60 * Self::NANOS_PER_MINUTE;

    pub fn new(months: i32, days: i32, nanos: i64) -> Self {
        Self {
            months,
            days,
            nanos,
        }
    }

    pub fn from_part(count: i64, part: &str) -> Result<Self> {
        let c32 = || -> Result<i32> {
            i32::try_from(count)
                .map_err(|_| Error::overflow(format!("INTERVAL {} {}", count, part)))
        };
        match part.to_ascii_uppercase().as_str() {
            "YEAR" => Ok(Self::new(c32()? * 12, 0, 0)),
            "QUARTER" => Ok(Self::new(c32()? * 3, 0, 0)),
            "MONTH" => Ok(Self::new(c32()?, 0, 0)),
            "WEEK" => Ok(Self::new(0, c32()? * 7, 0)),
            "DAY" => Ok(Self::new(0, c32()?, 0)),
            "HOUR" => Ok(Self::new(0, 0, count * Self::NANOS_PER_HOUR)),
            "MINUTE" => Ok(Self::new(0, 0, count * Self::NANOS_PER_MINUTE)),
            "SECOND" => Ok(Self::new(0, 0, count * Self::NANOS_PER_SECOND)),
            "MILLISECOND" => Ok(Self::new(0, 0, count * 1_000_000)),
            "MICROSECOND" => Ok(Self::new(0, 0, count * Self::NANOS_PER_MICRO)),
            other => Err(Error::invalid_argument(format!(
                "INTERVAL: unsupported part {}",
                other
            ))),
        }
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.months, -self.days, -self.nanos)
    }
}

impl fmt::Display for IntervalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.nanos.abs();
        let time_sign = if self.nanos < 0 { "-" } else { "" };
        let hours = nanos / IntervalValue::NANOS_PER_HOUR;
        let minutes = (nanos / IntervalValue::NANOS_PER_MINUTE) % 60;
        let seconds = (nanos / IntervalValue::NANOS_PER_SECOND) % 60;
        let sub = nanos % IntervalValue::NANOS_PER_SECOND;
        write!(
            f,
            "{}-{} {} {}{}:{}:{}",
            self.months / 12,
            (self.months % 12).abs(),
            self.days,
            time_sign,
            hours,
            minutes,
            seconds
        )?;
        if sub != 0 {
            let frac = format!("{:09}", sub);
            write!(f, ".{}", frac.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

/// The engine's tagged value union. Every dialect scalar plus the
/// structured composites, and the `Safe` wrapper that absorbs errors
/// from arithmetic into NULL.
#[derive(Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Numeric(FixedDecimal),
    BigNumeric(FixedDecimal),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    Interval(IntervalValue),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Safe(Box<Value>),
}

impl Value {
    pub fn float64(v: f64) -> Self {
        Value::Float64(OrderedFloat(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Value::String(v.into())
    }

    pub fn numeric_from_i64(v: i64) -> Self {
        Value::Numeric(FixedDecimal::from_i64(DecimalKind::Numeric, v))
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Safe(inner) => inner.is_null(),
            _ => false,
        }
    }

    /// Strips any `Safe` wrapping, reporting whether one was present.
    pub fn unwrap_safe(&self) -> (&Value, bool) {
        match self {
            Value::Safe(inner) => (inner.unwrap_safe().0, true),
            other => (other, false),
        }
    }

    pub fn into_safe(self) -> Value {
        match self {
            Value::Safe(_) => self,
            other => Value::Safe(Box::new(other)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Bool(_) => DataType::Bool,
            Value::Int64(_) => DataType::Int64,
            Value::Float64(_) => DataType::Float64,
            Value::Numeric(_) => DataType::Numeric,
            Value::BigNumeric(_) => DataType::BigNumeric,
            Value::String(_) => DataType::String,
            Value::Bytes(_) => DataType::Bytes,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Interval(_) => DataType::Interval,
            Value::Json(_) => DataType::Json,
            Value::Array(elements) => DataType::Array(Box::new(
                elements
                    .iter()
                    .find(|v| !v.is_null())
                    .map(|v| v.data_type())
                    .unwrap_or(DataType::Unknown),
            )),
            Value::Struct(fields) => DataType::Struct(
                fields
                    .iter()
                    .map(|(name, v)| StructField {
                        name: name.clone(),
                        data_type: v.data_type(),
                    })
                    .collect(),
            ),
            Value::Safe(inner) => inner.data_type(),
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::type_mismatch(expected, self.data_type().to_string())
    }

    pub fn to_bool(&self) -> Result<bool> {
        match self.unwrap_safe().0 {
            Value::Bool(b) => Ok(*b),
            Value::Int64(v) => Ok(*v != 0),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(Error::type_coercion(format!("invalid BOOL literal {:?}", s))),
            },
            other => Err(other.mismatch("BOOL")),
        }
    }

    pub fn to_int64(&self) -> Result<i64> {
        match self.unwrap_safe().0 {
            Value::Int64(v) => Ok(*v),
            Value::Bool(b) => Ok(*b as i64),
            Value::Float64(f) => {
                let v = f.into_inner();
                if !v.is_finite() || v < -9.223_372_036_854_776e18 || v > 9.223_372_036_854_776e18 {
                    return Err(Error::overflow(format!("INT64 out of range: {}", v)));
                }
                // Half away from zero, matching CAST to INT64.
                Ok(v.abs().round().copysign(v) as i64)
            }
            Value::Numeric(d) | Value::BigNumeric(d) => d.to_i64("INT64"),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| Error::type_coercion(format!("invalid INT64 literal {:?}", s))),
            other => Err(other.mismatch("INT64")),
        }
    }

    pub fn to_float64(&self) -> Result<f64> {
        match self.unwrap_safe().0 {
            Value::Float64(f) => Ok(f.into_inner()),
            Value::Int64(v) => Ok(*v as f64),
            Value::Numeric(d) | Value::BigNumeric(d) => Ok(d.to_f64()),
            Value::String(s) => match s.trim() {
                "NaN" => Ok(f64::NAN),
                "Infinity" | "inf" | "+inf" => Ok(f64::INFINITY),
                "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
                t => t
                    .parse::<f64>()
                    .map_err(|_| Error::type_coercion(format!("invalid FLOAT64 literal {:?}", s))),
            },
            other => Err(other.mismatch("FLOAT64")),
        }
    }

    pub fn to_decimal(&self, kind: DecimalKind) -> Result<FixedDecimal> {
        match self.unwrap_safe().0 {
            Value::Numeric(d) | Value::BigNumeric(d) => d.rescale(kind),
            Value::Int64(v) => Ok(FixedDecimal::from_i64(kind, *v)),
            Value::Float64(f) => FixedDecimal::from_f64(kind, f.into_inner()),
            Value::String(s) => FixedDecimal::parse(kind, s),
            other => Err(other.mismatch(kind.name())),
        }
    }

    /// The semantic string form (not the SQL literal form).
    pub fn to_text(&self) -> Result<String> {
        match self.unwrap_safe().0 {
            Value::String(s) => Ok(s.clone()),
            Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Value::Int64(v) => Ok(v.to_string()),
            Value::Float64(f) => Ok(crate::encode::float_text(f.into_inner())),
            Value::Numeric(d) | Value::BigNumeric(d) => Ok(d.to_canonical_string()),
            Value::Date(d) => Ok(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Ok(t.format("%H:%M:%S%.6f").to_string()),
            Value::DateTime(dt) => Ok(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Value::Timestamp(ts) => Ok(ts.format("%Y-%m-%d %H:%M:%S%.6f+00").to_string()),
            Value::Interval(iv) => Ok(iv.to_string()),
            Value::Json(j) => Ok(j.to_string()),
            Value::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|_| Error::type_coercion("BYTES is not valid UTF-8")),
            other => Err(other.mismatch("STRING")),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self.unwrap_safe().0 {
            Value::Bytes(b) => Ok(b.clone()),
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(other.mismatch("BYTES")),
        }
    }

    pub fn to_date(&self) -> Result<NaiveDate> {
        match self.unwrap_safe().0 {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::Timestamp(ts) => Ok(ts.date_naive()),
            Value::String(s) => crate::datetime::parse_date(s),
            other => Err(other.mismatch("DATE")),
        }
    }

    pub fn to_time(&self) -> Result<NaiveTime> {
        match self.unwrap_safe().0 {
            Value::Time(t) => Ok(*t),
            Value::DateTime(dt) => Ok(dt.time()),
            Value::Timestamp(ts) => Ok(ts.time()),
            Value::String(s) => crate::datetime::parse_time(s),
            other => Err(other.mismatch("TIME")),
        }
    }

    pub fn to_datetime(&self) -> Result<NaiveDateTime> {
        match self.unwrap_safe().0 {
            Value::DateTime(dt) => Ok(*dt),
            Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).expect("midnight")),
            Value::Timestamp(ts) => Ok(ts.naive_utc()),
            Value::String(s) => crate::datetime::parse_datetime(s),
            other => Err(other.mismatch("DATETIME")),
        }
    }

    pub fn to_timestamp(&self) -> Result<DateTime<Utc>> {
        match self.unwrap_safe().0 {
            Value::Timestamp(ts) => Ok(*ts),
            Value::DateTime(dt) => Ok(dt.and_utc()),
            Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0).expect("midnight").and_utc()),
            Value::String(s) => crate::datetime::parse_timestamp(s),
            other => Err(other.mismatch("TIMESTAMP")),
        }
    }

    pub fn to_interval(&self) -> Result<IntervalValue> {
        match self.unwrap_safe().0 {
            Value::Interval(iv) => Ok(*iv),
            other => Err(other.mismatch("INTERVAL")),
        }
    }

    pub fn to_array(&self) -> Result<Vec<Value>> {
        match self.unwrap_safe().0 {
            Value::Array(items) => Ok(items.clone()),
            other => Err(other.mismatch("ARRAY")),
        }
    }

    pub fn to_struct(&self) -> Result<Vec<(String, Value)>> {
        match self.unwrap_safe().0 {
            Value::Struct(fields) => Ok(fields.clone()),
            other => Err(other.mismatch("STRUCT")),
        }
    }

    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        match self.unwrap_safe().0 {
            Value::Json(j) => Ok(j.clone()),
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| Error::type_coercion(format!("invalid JSON: {}", e))),
            other => Err(other.mismatch("JSON")),
        }
    }

    /// Ordering with numeric widening. Incompatible kinds are an error,
    /// not `false`; IS [NOT] DISTINCT FROM handles those itself.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        use Value::*;
        let a = self.unwrap_safe().0;
        let b = other.unwrap_safe().0;
        match (a, b) {
            (Null, Null) => Ok(Ordering::Equal),
            (Null, _) => Ok(Ordering::Less),
            (_, Null) => Ok(Ordering::Greater),
            (Bool(x), Bool(y)) => Ok(x.cmp(y)),
            (Int64(x), Int64(y)) => Ok(x.cmp(y)),
            (Float64(_), _) | (_, Float64(_)) if a.is_numeric_family() && b.is_numeric_family() => {
                let x = a.to_float64()?;
                let y = b.to_float64()?;
                Ok(OrderedFloat(x).cmp(&OrderedFloat(y)))
            }
            (BigNumeric(_), _) | (_, BigNumeric(_))
                if a.is_numeric_family() && b.is_numeric_family() =>
            {
                Ok(a.to_decimal(DecimalKind::BigNumeric)?
                    .cmp(&b.to_decimal(DecimalKind::BigNumeric)?))
            }
            (Numeric(_), _) | (_, Numeric(_))
                if a.is_numeric_family() && b.is_numeric_family() =>
            {
                Ok(a.to_decimal(DecimalKind::Numeric)?
                    .cmp(&b.to_decimal(DecimalKind::Numeric)?))
            }
            (String(x), String(y)) => Ok(x.cmp(y)),
            (Bytes(x), Bytes(y)) => Ok(x.cmp(y)),
            (Date(_), _) | (_, Date(_)) if a.is_dateish() && b.is_dateish() => {
                Ok(a.to_date()?.cmp(&b.to_date()?))
            }
            (Time(_), _) | (_, Time(_)) => Ok(a.to_time()?.cmp(&b.to_time()?)),
            (DateTime(_), _) | (_, DateTime(_)) if a.is_dateish() && b.is_dateish() => {
                Ok(a.to_datetime()?.cmp(&b.to_datetime()?))
            }
            (Timestamp(_), _) | (_, Timestamp(_)) => Ok(a.to_timestamp()?.cmp(&b.to_timestamp()?)),
            (Array(x), Array(y)) => {
                for (xe, ye) in x.iter().zip(y.iter()) {
                    match xe.compare(ye)? {
                        Ordering::Equal => continue,
                        non_eq => return Ok(non_eq),
                    }
                }
                Ok(x.len().cmp(&y.len()))
            }
            (Struct(x), Struct(y)) => {
                for ((_, xv), (_, yv)) in x.iter().zip(y.iter()) {
                    match xv.compare(yv)? {
                        Ordering::Equal => continue,
                        non_eq => return Ok(non_eq),
                    }
                }
                Ok(x.len().cmp(&y.len()))
            }
            _ => Err(Error::type_mismatch(
                a.data_type().to_string(),
                b.data_type().to_string(),
            )),
        }
    }

    pub fn equals(&self, other: &Value) -> Result<bool> {
        Ok(self.compare(other)? == Ordering::Equal)
    }

    fn is_numeric_family(&self) -> bool {
        matches!(
            self,
            Value::Int64(_) | Value::Float64(_) | Value::Numeric(_) | Value::BigNumeric(_)
        )
    }

    fn is_dateish(&self) -> bool {
        matches!(
            self,
            Value::Date(_) | Value::DateTime(_) | Value::Timestamp(_) | Value::String(_)
        ) || self.is_null()
    }

    /// Coerces into the declared type, filling missing struct fields
    /// with NULL and ordering them as declared. Used when binding
    /// parameters and inserted values against a catalog schema.
    pub fn coerce_to(&self, target: &DataType) -> Result<Value> {
        let (v, _) = self.unwrap_safe();
        if v.is_null() {
            return Ok(Value::Null);
        }
        match target {
            DataType::Unknown => Ok(v.clone()),
            DataType::Bool => Ok(Value::Bool(v.to_bool()?)),
            DataType::Int64 => Ok(Value::Int64(v.to_int64()?)),
            DataType::Float64 => Ok(Value::float64(v.to_float64()?)),
            DataType::Numeric => Ok(Value::Numeric(v.to_decimal(DecimalKind::Numeric)?)),
            DataType::BigNumeric => Ok(Value::BigNumeric(v.to_decimal(DecimalKind::BigNumeric)?)),
            DataType::String => Ok(Value::String(v.to_text()?)),
            DataType::Bytes => Ok(Value::Bytes(v.to_bytes()?)),
            DataType::Date => Ok(Value::Date(v.to_date()?)),
            DataType::Time => Ok(Value::Time(v.to_time()?)),
            DataType::DateTime => Ok(Value::DateTime(v.to_datetime()?)),
            DataType::Timestamp => Ok(Value::Timestamp(v.to_timestamp()?)),
            DataType::Interval => Ok(Value::Interval(v.to_interval()?)),
            DataType::Json => Ok(Value::Json(v.to_json_value()?)),
            DataType::Array(elem) => {
                let items = v.to_array()?;
                Ok(Value::Array(
                    items
                        .iter()
                        .map(|item| item.coerce_to(elem))
                        .collect::<Result<Vec<_>>>()?,
                ))
            }
            DataType::Struct(decl) => {
                let given = v.to_struct()?;
                let mut out = Vec::with_capacity(decl.len());
                for (i, field) in decl.iter().enumerate() {
                    let found = given
                        .iter()
                        .find(|(name, _)| !name.is_empty() && name == &field.name)
                        .map(|(_, fv)| fv)
                        .or_else(|| {
                            // positional fallback for unnamed inputs
                            given.get(i).filter(|(n, _)| n.is_empty()).map(|(_, fv)| fv)
                        });
                    let coerced = match found {
                        Some(fv) => fv.coerce_to(&field.data_type)?,
                        None => Value::Null,
                    };
                    out.push((field.name.clone(), coerced));
                }
                Ok(Value::Struct(out))
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Numeric(v) => write!(f, "NUMERIC '{}'", v),
            Value::BigNumeric(v) => write!(f, "BIGNUMERIC '{}'", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "b'{}'", hex::encode(v)),
            Value::Date(v) => write!(f, "DATE '{}'", v),
            Value::Time(v) => write!(f, "TIME '{}'", v),
            Value::DateTime(v) => write!(f, "DATETIME '{}'", v),
            Value::Timestamp(v) => {
                write!(f, "TIMESTAMP '{}'", v.format("%Y-%m-%d %H:%M:%S%.6f UTC"))
            }
            Value::Interval(v) => write!(f, "INTERVAL '{}'", v),
            Value::Json(v) => write!(f, "JSON '{}'", v),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Struct(fields) => {
                write!(f, "STRUCT(")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:?}", name, v)?;
                }
                write!(f, ")")
            }
            Value::Safe(inner) => write!(f, "SAFE({:?})", inner),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if name.is_empty() {
                        write!(f, "{}", v)?;
                    } else {
                        write!(f, "{}: {}", name, v)?;
                    }
                }
                write!(f, "}}")
            }
            Value::Bytes(v) => write!(f, "{}", hex::encode(v)),
            other => match other.to_text() {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "{:?}", other),
            },
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.hash(state),
            Value::Numeric(v) | Value::BigNumeric(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Interval(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
            Value::Array(items) => {
                for v in items {
                    v.hash(state);
                }
            }
            Value::Struct(fields) => {
                for (name, v) in fields {
                    name.hash(state);
                    v.hash(state);
                }
            }
            Value::Safe(inner) => inner.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_coercion_fills_missing_fields() {
        let declared = DataType::Struct(vec![
            StructField {
                name: "fieldX".into(),
                data_type: DataType::String,
            },
            StructField {
                name: "fieldY".into(),
                data_type: DataType::String,
            },
        ]);
        let given = Value::Struct(vec![("fieldY".into(), Value::from("bar"))]);
        let coerced = given.coerce_to(&declared).unwrap();
        assert_eq!(
            coerced,
            Value::Struct(vec![
                ("fieldX".into(), Value::Null),
                ("fieldY".into(), Value::from("bar")),
            ])
        );
    }

    #[test]
    fn numeric_widening_comparison() {
        let a = Value::Int64(3);
        let b = Value::Numeric(FixedDecimal::parse(DecimalKind::Numeric, "3.0").unwrap());
        assert!(a.equals(&b).unwrap());
        let c = Value::float64(3.5);
        assert_eq!(b.compare(&c).unwrap(), Ordering::Less);
    }

    #[test]
    fn incompatible_comparison_is_an_error() {
        let a = Value::Int64(1);
        let b = Value::from("1");
        assert!(a.compare(&b).is_err());
    }

    #[test]
    fn type_parse_round_trips() {
        for spec in [
            "INT64",
            "ARRAY<STRING>",
            "STRUCT<fieldA STRING, fieldB STRUCT<fieldX STRING, fieldY STRING>>",
            "ARRAY<STRUCT<a INT64, b FLOAT64>>",
        ] {
            let ty = DataType::parse(spec).unwrap();
            assert_eq!(ty.to_string(), spec);
        }
    }

    #[test]
    fn safe_wrapper_is_transparent_for_reads() {
        let v = Value::Int64(7).into_safe();
        assert_eq!(v.to_int64().unwrap(), 7);
        assert!(!v.is_null());
        assert_eq!(v.unwrap_safe(), (&Value::Int64(7), true));
    }
}
